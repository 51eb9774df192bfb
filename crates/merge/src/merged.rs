//! The growing output of one table: merged rows plus the indexes used to
//! find a candidate's match.

use std::collections::{BTreeSet, HashMap};

use crate::model::{Contribution, MergedRow, MergedTable, SourceId};
use crate::remap::KeyMap;
use crate::resolve::TableProfile;
use crate::schema::Table;
use crate::value::Value;

type Index = HashMap<Vec<Value>, Vec<usize>>;

pub struct MergedRelation<'p> {
    profile: &'p TableProfile,
    rows: Vec<MergedRow>,
    by_content: Index,
    by_key: Vec<Index>,
    /// Sequence values in use, per scope.
    sequences: HashMap<Vec<Value>, BTreeSet<i64>>,
    skipped: Vec<Contribution>,
}

impl<'p> MergedRelation<'p> {
    pub fn new(profile: &'p TableProfile) -> Self {
        Self {
            profile,
            rows: Vec::new(),
            by_content: HashMap::new(),
            by_key: vec![HashMap::new(); profile.natural_keys.len()],
            sequences: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &MergedRow {
        &self.rows[index]
    }

    /// Existing row the candidate should be compared with.
    ///
    /// Rows that already hold a contribution from `origin` are never matched:
    /// two rows of one source are two records, whatever their content.
    pub fn find_match(&self, origin: SourceId, values: &[Value]) -> Option<usize> {
        let p = self.profile;
        let available = |hits: Option<&Vec<usize>>| {
            hits?.iter().copied().find(|&i| !self.rows[i].has_origin(origin))
        };

        if let Some(i) = available(self.by_content.get(&p.content_key(values))) {
            return Some(i);
        }
        if p.singleton {
            return (0..self.rows.len()).find(|&i| !self.rows[i].has_origin(origin));
        }
        for (key, index) in p.natural_keys.iter().zip(&self.by_key) {
            if let Some(k) = p.natural_key(key, values) {
                if let Some(i) = available(index.get(&k)) {
                    return Some(i);
                }
            }
        }
        None
    }

    /// First row other than `except` that already holds one of `values`'
    /// UNIQUE or primary-key values, with the key's columns. Writing `values`
    /// as well would violate that constraint.
    pub fn collision(&self, values: &[Value], except: Option<usize>) -> Option<(usize, Vec<usize>)> {
        let p = self.profile;
        for (key, index) in p.natural_keys.iter().zip(&self.by_key) {
            let Some(raw) = p.enforced_key(key, values) else { continue };
            let Some(lookup) = p.natural_key(key, values) else { continue };
            let Some(hits) = index.get(&lookup) else { continue };
            let hit = hits.iter().copied().find(|&i| {
                Some(i) != except && p.enforced_key(key, &self.rows[i].values).as_ref() == Some(&raw)
            });
            if let Some(i) = hit {
                return Some((i, key.columns.clone()));
            }
        }
        None
    }

    /// Append a distinct row, renumbering its sequence column if the value is
    /// taken in its scope. Returns the new row's index and whether it was
    /// renumbered.
    pub fn append(&mut self, mut values: Vec<Value>, contribution: Contribution) -> (usize, bool) {
        let renumbered = self.claim_sequence(&mut values);
        let index = self.rows.len();
        self.rows.push(MergedRow {
            values,
            contributions: vec![contribution],
        });
        self.index_row(index);
        (index, renumbered)
    }

    /// Fold an identical candidate in; only the modification column may move.
    pub fn absorb(&mut self, index: usize, values: &[Value], contribution: Contribution) {
        if let Some(m) = self.profile.modified {
            if values[m] > self.rows[index].values[m] {
                let mut updated = self.rows[index].values.clone();
                updated[m] = values[m].clone();
                if self.collision(&updated, Some(index)).is_none() {
                    self.replace(index, updated);
                }
            }
        }
        self.rows[index].contributions.push(contribution);
    }

    /// Replace a row's values after a conflict merge and re-index it.
    pub fn replace(&mut self, index: usize, values: Vec<Value>) {
        self.unindex_row(index);
        self.rows[index].values = values;
        self.index_row(index);
    }

    pub fn add_contribution(&mut self, index: usize, contribution: Contribution) {
        self.rows[index].contributions.push(contribution);
    }

    /// Remember a dropped source row so children referencing it are
    /// reported as cascades.
    pub fn skip(&mut self, contribution: Contribution) {
        self.skipped.push(contribution);
    }

    /// Finish the table: the merged rows and the key map children use.
    pub fn seal(self, table: &Table) -> (MergedTable, KeyMap) {
        let p = self.profile;
        let mut map = KeyMap::new(table);
        for row in &self.rows {
            for c in &row.contributions {
                for (j, &col) in p.mapped.iter().enumerate() {
                    map.insert(p.column_name(col), c.origin, c.referenced[j].clone(), row.values[col].clone());
                }
            }
        }
        for c in &self.skipped {
            for (j, &col) in p.mapped.iter().enumerate() {
                map.mark_skipped(p.column_name(col), c.origin, c.referenced[j].clone());
            }
        }
        let merged = MergedTable {
            name: table.name.clone(),
            rows: self.rows,
        };
        (merged, map)
    }

    fn index_row(&mut self, index: usize) {
        let p = self.profile;
        let values = &self.rows[index].values;
        insert_sorted(self.by_content.entry(p.content_key(values)).or_default(), index);
        for (key, idx) in p.natural_keys.iter().zip(self.by_key.iter_mut()) {
            if let Some(k) = p.natural_key(key, values) {
                insert_sorted(idx.entry(k).or_default(), index);
            }
        }
    }

    fn unindex_row(&mut self, index: usize) {
        let p = self.profile;
        let values = &self.rows[index].values;
        remove_from(&mut self.by_content, &p.content_key(values), index);
        for (key, idx) in p.natural_keys.iter().zip(self.by_key.iter_mut()) {
            if let Some(k) = p.natural_key(key, values) {
                remove_from(idx, &k, index);
            }
        }
    }

    fn claim_sequence(&mut self, values: &mut [Value]) -> bool {
        let p = self.profile;
        let Some((col, scope)) = &p.sequence else {
            return false;
        };
        let Some(position) = values[*col].as_i64() else {
            return false;
        };
        let scope_key: Vec<Value> = scope.iter().map(|&i| values[i].clone()).collect();
        let used = self.sequences.entry(scope_key).or_default();
        let mut renumbered = false;
        let position = if used.contains(&position) {
            renumbered = true;
            used.last().map_or(0, |max| max + 1)
        } else {
            position
        };
        used.insert(position);
        values[*col] = Value::Integer(position);
        renumbered
    }
}

fn insert_sorted(list: &mut Vec<usize>, index: usize) {
    if let Err(pos) = list.binary_search(&index) {
        list.insert(pos, index);
    }
}

fn remove_from(index: &mut Index, key: &[Value], row: usize) {
    if let Some(list) = index.get_mut(key) {
        list.retain(|&i| i != row);
        if list.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeConfig;
    use crate::schema::{Column, Schema};

    fn tag_map() -> Table {
        Table::new("TagMap")
            .column(Column::integer_key("TagMapId"))
            .column(Column::new("TagId", "INTEGER"))
            .column(Column::new("NoteId", "INTEGER"))
            .column(Column::new("Position", "INTEGER"))
    }

    fn profile() -> TableProfile {
        let table = tag_map();
        let schema = Schema::new(vec![table.clone()]).unwrap();
        let config = MergeConfig::from_toml(
            "[tables.TagMap]\nignore = [\"Position\"]\nsequence = { column = \"Position\", scope = [\"TagId\"] }\n",
        )
        .unwrap();
        TableProfile::compile(&schema, &table, config.rule("TagMap")).unwrap()
    }

    fn contribution(origin: usize, key: i64) -> Contribution {
        Contribution {
            origin: SourceId(origin),
            original_key: Value::Integer(key),
            referenced: vec![Value::Integer(key)],
        }
    }

    fn values(id: i64, tag: i64, note: i64, pos: i64) -> Vec<Value> {
        vec![Value::Integer(id), Value::Integer(tag), Value::Integer(note), Value::Integer(pos)]
    }

    #[test]
    fn same_origin_never_matches() {
        let p = profile();
        let mut rel = MergedRelation::new(&p);
        rel.append(values(1, 1, 1, 0), contribution(0, 1));
        assert_eq!(rel.find_match(SourceId(0), &values(2, 1, 1, 1)), None);
        assert_eq!(rel.find_match(SourceId(1), &values(9, 1, 1, 5)), Some(0));
    }

    #[test]
    fn colliding_sequence_is_renumbered() {
        let p = profile();
        let mut rel = MergedRelation::new(&p);
        rel.append(values(1, 1, 1, 0), contribution(0, 1));
        rel.append(values(2, 1, 2, 1), contribution(0, 2));
        let (i, renumbered) = rel.append(values(1, 1, 3, 0), contribution(1, 1));
        assert!(renumbered);
        assert_eq!(rel.row(i).values[3], Value::Integer(2));
        let (j, renumbered) = rel.append(values(2, 2, 3, 0), contribution(1, 2));
        assert!(!renumbered);
        assert_eq!(rel.row(j).values[3], Value::Integer(0));
    }

    #[test]
    fn replace_reindexes() {
        let p = profile();
        let mut rel = MergedRelation::new(&p);
        rel.append(values(1, 1, 1, 0), contribution(0, 1));
        rel.replace(0, values(1, 1, 5, 0));
        assert_eq!(rel.find_match(SourceId(1), &values(3, 1, 1, 0)), None);
        assert_eq!(rel.find_match(SourceId(1), &values(3, 1, 5, 0)), Some(0));
    }

    #[test]
    fn seal_maps_every_contribution() {
        let p = profile();
        let table = tag_map();
        let mut rel = MergedRelation::new(&p);
        let (i, _) = rel.append(values(1, 1, 1, 0), contribution(0, 1));
        rel.add_contribution(i, contribution(1, 7));
        rel.skip(contribution(1, 8));
        let (merged, map) = rel.seal(&table);
        assert_eq!(merged.len(), 1);
        assert_eq!(map.get_key(SourceId(1), &Value::Integer(7)), Some(&Value::Integer(1)));
        assert!(map.was_skipped("TagMapId", SourceId(1), &Value::Integer(8)));
    }
}
