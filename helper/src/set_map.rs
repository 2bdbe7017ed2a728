// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

/// KeyType -> { CellType } data structure
#[derive(Clone)]
pub struct SetMap<KeyType, CellType>
where
    KeyType: Ord,
{
    map: BTreeMap<KeyType, BTreeSet<CellType>>,
}

impl<KeyType, CellType> Display for SetMap<KeyType, CellType>
where
    KeyType: Ord,
    KeyType: Display,
    CellType: Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (k, set) in self.map.iter() {
            writeln!(f, "{}", k)?;
            for v in set.iter() {
                writeln!(f, "\t->{}", v)?;
            }
        }
        writeln!(f)
    }
}

impl<KeyType, CellType> SetMap<KeyType, CellType>
where
    KeyType: Ord,
    CellType: Ord,
{
    pub fn new() -> SetMap<KeyType, CellType> {
        SetMap {
            map: BTreeMap::new(),
        }
    }

    pub fn get<'a>(&'a self, id: &KeyType) -> Option<&'a BTreeSet<CellType>> {
        self.map.get(id)
    }

    pub fn insert(&mut self, id: KeyType, val: CellType) {
        if let Some(id_set) = self.map.get_mut(&id) {
            id_set.insert(val);
            return;
        }
        let mut new_set = BTreeSet::<CellType>::new();
        new_set.insert(val);
        self.map.insert(id, new_set);
    }

    pub fn extend(&mut self, id: KeyType, set: BTreeSet<CellType>) {
        if let Some(id_set) = self.map.get_mut(&id) {
            id_set.extend(set);
            return;
        }
        self.map.insert(id, set);
    }

    /// Replaces the set stored under [id] with [set].
    /// Returns true if the stored set changed. A missing entry counts
    /// as the empty set.
    pub fn swap_in(&mut self, id: KeyType, set: BTreeSet<CellType>) -> bool {
        let changed = match self.map.get(&id) {
            Some(old) => *old != set,
            None => !set.is_empty(),
        };
        self.map.insert(id, set);
        changed
    }

    pub fn contains(&self, id: &KeyType, val: &CellType) -> bool {
        if let Some(set) = self.map.get(id) {
            return set.contains(val);
        }
        false
    }

    pub fn len_of(&self, id: &KeyType) -> usize {
        if let Some(set) = self.map.get(id) {
            return set.len();
        }
        return 0;
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn keys(&self) -> std::collections::btree_map::Keys<'_, KeyType, BTreeSet<CellType>> {
        self.map.keys()
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, KeyType, BTreeSet<CellType>> {
        self.map.iter()
    }

    pub fn set_iter<'a>(
        &'a self,
        id: &KeyType,
    ) -> Option<std::collections::btree_set::Iter<'a, CellType>> {
        if let Some(set) = self.map.get(id) {
            return Some(set.iter());
        }
        None
    }
}

impl<KeyType, CellType> PartialEq for SetMap<KeyType, CellType>
where
    KeyType: Ord,
    CellType: Ord,
{
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}
