// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeMap;

/// KeyType -> [ CellType ] data structure
#[derive(Clone)]
pub struct VecMap<KeyType, CellType>
where
    KeyType: Ord,
{
    map: BTreeMap<KeyType, Vec<CellType>>,
}

impl<KeyType, CellType> VecMap<KeyType, CellType>
where
    KeyType: Ord,
    CellType: Ord,
{
    pub fn new() -> VecMap<KeyType, CellType> {
        VecMap {
            map: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, id: KeyType, cell_val: CellType) {
        if let Some(id_vec) = self.map.get_mut(&id) {
            id_vec.push(cell_val);
            return;
        }
        self.map.insert(id, vec![cell_val]);
    }

    pub fn extend(&mut self, id: KeyType, vec: Vec<CellType>) {
        if let Some(id_vec) = self.map.get_mut(&id) {
            id_vec.extend(vec);
            return;
        }
        self.map.insert(id, vec);
    }

    /// Makes sure an entry for [id] exists, even if nothing
    /// was pushed to it.
    pub fn ensure(&mut self, id: KeyType) {
        self.map.entry(id).or_insert_with(Vec::new);
    }

    /// Sorts the list of [id] and drops duplicates.
    pub fn sort_dedup(&mut self, id: &KeyType) {
        if let Some(id_vec) = self.map.get_mut(id) {
            id_vec.sort();
            id_vec.dedup();
        }
    }

    pub fn len_of(&self, id: &KeyType) -> usize {
        if let Some(vec) = self.map.get(id) {
            return vec.len();
        }
        return 0;
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get<'a>(&'a self, id: &KeyType) -> Option<&'a [CellType]> {
        self.map.get(id).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> std::collections::btree_map::Keys<'_, KeyType, Vec<CellType>> {
        self.map.keys()
    }

    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, KeyType, Vec<CellType>> {
        self.map.iter()
    }

    pub fn vec_iter<'a>(&'a self, id: &KeyType) -> Option<std::slice::Iter<'a, CellType>> {
        if let Some(vec) = self.map.get(id) {
            return Some(vec.iter());
        }
        None
    }
}

impl<KeyType, CellType> PartialEq for VecMap<KeyType, CellType>
where
    KeyType: Ord,
    CellType: Ord,
{
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}
