use crate::composition::ingredient_names;
use crate::data::{Prescription, Record};
use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, Streamer};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Position of a record in the catalog's backing vector.
pub type RecordId = usize;

/// Lower edge of the 100-wide price bucket containing `price`.
pub fn price_bucket(price: f64) -> i64 {
    ((price / 100.0).floor() as i64).saturating_mul(100)
}

/// Key → record ids, keys in order of first appearance, ids in catalog order.
#[derive(Debug, Default)]
struct Groups {
    positions: HashMap<String, usize>,
    entries: Vec<(String, Vec<RecordId>)>,
}

impl Groups {
    fn push(&mut self, key: &str, id: RecordId) {
        let slot = match self.positions.get(key) {
            Some(&slot) => slot,
            None => {
                self.positions.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        let ids = &mut self.entries[slot].1;
        // A record may name the same key twice (full composition equal to its only
        // ingredient, or a repeated ingredient); list it once.
        if ids.last() != Some(&id) {
            ids.push(id);
        }
    }

    fn get(&self, key: &str) -> Option<&[RecordId]> {
        self.positions
            .get(key)
            .map(|&slot| self.entries[slot].1.as_slice())
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &[RecordId])> + '_ {
        self.entries
            .iter()
            .map(|(key, ids)| (key.as_str(), ids.as_slice()))
    }
}

/// The immutable catalog plus every lookup structure derived from it.
///
/// Built once, never mutated; all query operations borrow it. Indices hold record ids
/// into `records`, never copies.
pub struct MedicineIndex {
    records: Vec<Record>,
    search_text: Vec<String>,
    name_positions: HashMap<String, usize>,
    names: Vec<(String, RecordId)>,
    name_prefixes: Option<Map<Vec<u8>>>,
    manufacturers: Groups,
    compositions: Groups,
    exact_compositions: Groups,
    price_buckets: BTreeMap<i64, Vec<RecordId>>,
    prescribed: Vec<RecordId>,
    over_the_counter: Vec<RecordId>,
    unknown_prescription: usize,
    ingredients: Vec<String>,
}

impl MedicineIndex {
    pub fn build(records: Vec<Record>) -> Self {
        let search_text = records.par_iter().map(Record::search_text).collect();
        let mut index = Self {
            records: Vec::new(),
            search_text,
            name_positions: HashMap::new(),
            names: Vec::new(),
            name_prefixes: None,
            manufacturers: Groups::default(),
            compositions: Groups::default(),
            exact_compositions: Groups::default(),
            price_buckets: BTreeMap::new(),
            prescribed: Vec::new(),
            over_the_counter: Vec::new(),
            unknown_prescription: 0,
            ingredients: Vec::new(),
        };
        let mut seen_ingredients = HashSet::new();

        for (id, record) in records.iter().enumerate() {
            if let Some(name) = record.name.as_deref() {
                index.insert_name(name, id);
            }
            if let Some(manufacturer) = record.manufacturer.as_deref() {
                index.manufacturers.push(manufacturer, id);
            }
            if let Some(composition) = record.composition.as_deref() {
                index.compositions.push(composition, id);
                index.exact_compositions.push(composition, id);
                for ingredient in ingredient_names(composition) {
                    index.compositions.push(&ingredient, id);
                    if seen_ingredients.insert(ingredient.clone()) {
                        index.ingredients.push(ingredient);
                    }
                }
            }
            if let Some(price) = record.price() {
                index
                    .price_buckets
                    .entry(price_bucket(price))
                    .or_default()
                    .push(id);
            }
            match record.prescription_flag() {
                Some(Prescription::Required) => index.prescribed.push(id),
                Some(Prescription::NotRequired) => index.over_the_counter.push(id),
                None => index.unknown_prescription += 1,
            }
        }

        index.records = records;
        index.name_prefixes = index.build_prefix_map();
        info!(
            records = index.records.len(),
            names = index.names.len(),
            manufacturers = index.manufacturers.entries.len(),
            composition_keys = index.compositions.entries.len(),
            ingredients = index.ingredients.len(),
            price_buckets = index.price_buckets.len(),
            "Built medicine index"
        );
        index
    }

    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    // Duplicate names: the latest record wins, the key keeps its first position.
    fn insert_name(&mut self, name: &str, id: RecordId) {
        match self.name_positions.get(name) {
            Some(&slot) => self.names[slot].1 = id,
            None => {
                self.name_positions.insert(name.to_string(), self.names.len());
                self.names.push((name.to_string(), id));
            }
        }
    }

    fn build_prefix_map(&self) -> Option<Map<Vec<u8>>> {
        let mut keys: Vec<(&str, u64)> = self
            .names
            .iter()
            .enumerate()
            .map(|(slot, (name, _))| (name.as_str(), slot as u64))
            .collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(b.0));
        match Map::from_iter(keys.into_iter().map(|(name, slot)| (name.as_bytes(), slot))) {
            Ok(map) => Some(map),
            Err(err) => {
                warn!(error = %err, "Name prefix index unavailable");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, id: RecordId) -> &Record {
        &self.records[id]
    }

    pub(crate) fn search_text(&self, id: RecordId) -> &str {
        &self.search_text[id]
    }

    /// Exact name lookup.
    pub fn by_name(&self, name: &str) -> Option<RecordId> {
        self.name_positions
            .get(name)
            .map(|&slot| self.names[slot].1)
    }

    /// Distinct names with the record each resolves to, in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = (&str, RecordId)> + '_ {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub(crate) fn name_entries(&self) -> &[(String, RecordId)] {
        &self.names
    }

    /// Up to `limit` records whose name starts with `prefix`, in byte order of name.
    pub fn names_with_prefix(&self, prefix: &str, limit: usize) -> Vec<RecordId> {
        let Some(map) = self.name_prefixes.as_ref() else {
            return Vec::new();
        };
        let automaton = Str::new(prefix).starts_with();
        let mut stream = map.search(automaton).into_stream();
        let mut results = Vec::new();
        while let Some((_, slot)) = stream.next() {
            results.push(self.names[slot as usize].1);
            if results.len() >= limit {
                break;
            }
        }
        results
    }

    pub fn by_manufacturer(&self, manufacturer: &str) -> Option<&[RecordId]> {
        self.manufacturers.get(manufacturer)
    }

    pub fn manufacturers(&self) -> impl Iterator<Item = (&str, &[RecordId])> + '_ {
        self.manufacturers.iter()
    }

    /// Records filed under a full composition string or a single ingredient name.
    pub fn by_composition_key(&self, key: &str) -> Option<&[RecordId]> {
        self.compositions.get(key)
    }

    /// Records whose composition string equals `composition` exactly.
    pub fn by_exact_composition(&self, composition: &str) -> &[RecordId] {
        self.exact_compositions.get(composition).unwrap_or(&[])
    }

    pub fn price_buckets(&self) -> impl Iterator<Item = (i64, &[RecordId])> + '_ {
        self.price_buckets
            .iter()
            .map(|(bucket, ids)| (*bucket, ids.as_slice()))
    }

    pub(crate) fn price_buckets_from(
        &self,
        lowest: i64,
    ) -> impl Iterator<Item = (i64, &[RecordId])> + '_ {
        self.price_buckets
            .range(lowest..)
            .map(|(bucket, ids)| (*bucket, ids.as_slice()))
    }

    pub fn by_prescription(&self, prescription: Prescription) -> &[RecordId] {
        match prescription {
            Prescription::Required => &self.prescribed,
            Prescription::NotRequired => &self.over_the_counter,
        }
    }

    pub fn unknown_prescription_count(&self) -> usize {
        self.unknown_prescription
    }

    /// Every distinct ingredient name, in first-seen order.
    pub fn known_ingredients(&self) -> &[String] {
        &self.ingredients
    }
}

impl fmt::Debug for MedicineIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MedicineIndex")
            .field("records", &self.records.len())
            .field("names", &self.names.len())
            .field("manufacturers", &self.manufacturers.entries.len())
            .field("ingredients", &self.ingredients.len())
            .finish_non_exhaustive()
    }
}

/// Shared owner of the current index snapshot.
///
/// Readers take a cheap `Arc` clone and keep using it for the whole request; a reload
/// swaps in a fully built replacement so no reader ever sees a partial index.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<MedicineIndex>>,
}

impl CatalogHandle {
    pub fn new(index: MedicineIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<MedicineIndex> {
        Arc::clone(&self.current.read())
    }

    /// Installs `index` and returns the snapshot it replaced.
    pub fn replace(&self, index: MedicineIndex) -> Arc<MedicineIndex> {
        let next = Arc::new(index);
        std::mem::replace(&mut *self.current.write(), next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample() -> MedicineIndex {
        MedicineIndex::build(vec![
            Record::new("Paracet 500")
                .with_manufacturer("Acme")
                .with_composition("Paracetamol (500mg)")
                .with_mrp("20")
                .with_prescription("No"),
            Record::new("Paracet Plus")
                .with_manufacturer("Acme")
                .with_composition("Paracetamol (500mg)+Caffeine (30mg)")
                .with_mrp("35")
                .with_prescription("No"),
            Record::new("Azee 500")
                .with_manufacturer("Cipla")
                .with_composition("Azithromycin (500mg)")
                .with_mrp("not-a-number")
                .with_prescription("Yes"),
            Record::new("Paracet 500")
                .with_manufacturer("Other")
                .with_composition("Paracetamol (650mg)")
                .with_mrp(150)
                .with_prescription("Maybe"),
        ])
    }

    #[test]
    fn duplicate_names_keep_the_last_record() {
        let index = sample();
        assert_eq!(index.by_name("Paracet 500"), Some(3));
        let names: Vec<_> = index.names().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Paracet 500", "Paracet Plus", "Azee 500"]);
    }

    #[test]
    fn composition_keys_cover_full_string_and_ingredients() {
        let index = sample();
        assert_eq!(index.by_composition_key("Paracetamol"), Some(&[0, 1, 3][..]));
        assert_eq!(index.by_composition_key("Caffeine"), Some(&[1][..]));
        assert_eq!(
            index.by_composition_key("Paracetamol (500mg)+Caffeine (30mg)"),
            Some(&[1][..])
        );
        assert_eq!(index.by_exact_composition("Paracetamol (500mg)"), &[0]);
        assert_eq!(
            index.known_ingredients(),
            &["Paracetamol", "Caffeine", "Azithromycin"]
        );
    }

    #[test]
    fn manufacturers_keep_insertion_order() {
        let index = sample();
        let groups: Vec<_> = index
            .manufacturers()
            .map(|(name, ids)| (name, ids.len()))
            .collect();
        assert_eq!(groups, vec![("Acme", 2), ("Cipla", 1), ("Other", 1)]);
        assert_eq!(index.by_manufacturer("Acme"), Some(&[0, 1][..]));
    }

    #[test]
    fn price_buckets_skip_unparseable_prices() {
        let index = sample();
        let buckets: Vec<_> = index
            .price_buckets()
            .map(|(bucket, ids)| (bucket, ids.to_vec()))
            .collect();
        assert_eq!(buckets, vec![(0, vec![0, 1]), (100, vec![3])]);
    }

    #[test]
    fn price_bucket_is_monotonic() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut prices: Vec<f64> = (0..1000).map(|_| rng.gen_range(-50.0..5000.0)).collect();
        prices.extend([0.0, 99.99, 100.0, 199.999, 200.0]);
        prices.sort_by(f64::total_cmp);
        for pair in prices.windows(2) {
            assert!(price_bucket(pair[0]) <= price_bucket(pair[1]));
        }
        assert_eq!(price_bucket(99.99), 0);
        assert_eq!(price_bucket(100.0), 100);
        assert_eq!(price_bucket(-0.5), -100);
    }

    #[test]
    fn prescription_partition_counts_unknown() {
        let index = sample();
        assert_eq!(index.by_prescription(Prescription::Required), &[2]);
        assert_eq!(index.by_prescription(Prescription::NotRequired), &[0, 1]);
        assert_eq!(index.unknown_prescription_count(), 1);
    }

    #[test]
    fn prefix_lookup_walks_names_in_byte_order() {
        let index = sample();
        assert_eq!(index.names_with_prefix("Paracet", 10), vec![3, 1]);
        assert_eq!(index.names_with_prefix("Paracet", 1), vec![3]);
        assert!(index.names_with_prefix("Zzz", 10).is_empty());
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let first = sample();
        let second = sample();
        assert_eq!(first.names, second.names);
        assert_eq!(first.compositions.entries, second.compositions.entries);
        assert_eq!(first.price_buckets, second.price_buckets);
    }

    #[test]
    fn handle_swaps_whole_snapshots() {
        let handle = CatalogHandle::new(sample());
        let before = handle.snapshot();
        let previous = handle.replace(MedicineIndex::empty());
        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.len(), 4);
        assert!(handle.snapshot().is_empty());
    }
}
