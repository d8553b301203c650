//! Loupe persistence: the shareable, flat string-keyed form of the filter selection.
//!
//! Each rank filter, each allow-listed categorical filter and the first-image toggle
//! has its own slot. Absent slots decode to the zero value. [`Location`] holds the
//! current slots (think URL fragment) and lets the navigator observe changes made
//! by someone else, such as back/forward navigation.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use loupe_core::{NavigatorConfig, Rank};
use loupe_search::FilterSet;
use tokio::sync::watch;
use tracing::debug;

pub type Slots = BTreeMap<String, String>;

pub const FIRST_IMAGE_ONLY_SLOT: &str = "firstImageOnly";

/// Maps a [`FilterSet`] to slots and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    categorical_keys: Vec<String>,
}

impl Codec {
    pub fn new<I, S>(categorical_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { categorical_keys: categorical_keys.into_iter().map(Into::into).collect() }
    }

    pub fn from_config(cfg: &NavigatorConfig) -> Self { Self::new(cfg.categorical_facets.iter().cloned()) }

    pub fn encode(&self, filters: &FilterSet) -> Slots {
        let mut slots = Slots::new();
        for (rank, fq) in filters.set_ranks() {
            slots.insert(rank.name().to_string(), fq.to_string());
        }
        for (key, fq) in filters.categoricals() {
            if self.categorical_keys.iter().any(|k| k == key) {
                slots.insert(key.to_string(), fq.to_string());
            } else {
                debug!(key, "persist: categorical key has no slot; not encoded");
            }
        }
        if filters.first_image_only() {
            slots.insert(FIRST_IMAGE_ONLY_SLOT.to_string(), "true".to_string());
        }
        slots
    }

    pub fn decode(&self, slots: &Slots) -> FilterSet {
        let mut ranks: [Option<String>; Rank::COUNT] = Default::default();
        for rank in Rank::ALL {
            ranks[rank.index()] = slot(slots, rank.name()).map(str::to_string);
        }
        let categorical = self
            .categorical_keys
            .iter()
            .filter_map(|k| slot(slots, k).map(|v| (k.clone(), v.to_string())))
            .collect();
        let first_image_only = slot(slots, FIRST_IMAGE_ONLY_SLOT) == Some("true");
        FilterSet::from_parts(categorical, ranks, first_image_only)
    }
}

// Empty values count as absent.
fn slot<'a>(slots: &'a Slots, name: &str) -> Option<&'a str> {
    slots.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

/// `key=value&...`, form-urlencoded, without the leading `#`.
pub fn to_fragment(slots: &Slots) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in slots {
        ser.append_pair(k, v);
    }
    ser.finish()
}

/// Parse a fragment; a leading `#` is tolerated and later duplicates win.
pub fn from_fragment(fragment: &str) -> Slots {
    let raw = fragment.strip_prefix('#').unwrap_or(fragment);
    url::form_urlencoded::parse(raw.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Shared holder of the persisted slots.
#[derive(Clone)]
pub struct Location {
    tx: Arc<watch::Sender<Slots>>,
}

impl Location {
    pub fn new(initial: Slots) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn from_fragment(fragment: &str) -> Self { Self::new(from_fragment(fragment)) }

    pub fn current(&self) -> Slots { self.tx.borrow().clone() }

    pub fn fragment(&self) -> String { to_fragment(&self.tx.borrow()) }

    /// Change made outside the navigator (back/forward, pasted link).
    pub fn navigate(&self, slots: Slots) {
        debug!(slots = slots.len(), "location: external navigation");
        self.tx.send_replace(slots);
    }

    /// Watcher that starts with the current value already seen.
    pub fn subscribe(&self) -> LocationWatch {
        LocationWatch { rx: self.tx.subscribe(), tx: Arc::clone(&self.tx) }
    }
}

/// The navigator's view of a [`Location`]: its own writes are not reported back to it.
pub struct LocationWatch {
    rx: watch::Receiver<Slots>,
    tx: Arc<watch::Sender<Slots>>,
}

impl LocationWatch {
    /// Write local state; the write is marked seen for this watcher. Call
    /// [`LocationWatch::take_external`] first or a pending external change is overwritten.
    pub fn replace(&mut self, slots: Slots) {
        if *self.rx.borrow() != slots {
            self.tx.send_replace(slots);
        }
        drop(self.rx.borrow_and_update());
    }

    /// Slots written by someone else since the last look.
    pub fn take_external(&mut self) -> Option<Slots> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Wait for the next external write.
    pub async fn changed(&mut self) -> Option<Slots> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::FacetKey;
    use loupe_search::FilterState;

    fn codec() -> Codec { Codec::new(["typeStatus", "raw_sex"]) }

    #[test]
    fn encode_uses_one_slot_per_field() {
        let mut s = FilterState::new();
        s.apply_filter(&FacetKey::Rank(Rank::Kingdom), "kingdom:\"Animalia\"").unwrap();
        s.apply_filter(&FacetKey::Categorical("raw_sex".into()), "raw_sex:female").unwrap();
        s.set_first_image_only(true);
        let slots = codec().encode(s.filters());
        assert_eq!(slots.len(), 3);
        assert_eq!(slots["kingdom"], "kingdom:\"Animalia\"");
        assert_eq!(slots["raw_sex"], "raw_sex:female");
        assert_eq!(slots[FIRST_IMAGE_ONLY_SLOT], "true");
        assert_eq!(codec().decode(&slots), *s.filters());
    }

    #[test]
    fn absent_and_unknown_slots() {
        let mut slots = Slots::new();
        slots.insert("utm_source".into(), "mail".into());
        slots.insert("typeStatus".into(), String::new());
        slots.insert(FIRST_IMAGE_ONLY_SLOT.into(), "yes".into());
        assert_eq!(codec().decode(&slots), FilterSet::default());
    }

    #[test]
    fn decode_drops_ranks_below_a_gap() {
        let mut slots = Slots::new();
        slots.insert("kingdom".into(), "kingdom:\"Animalia\"".into());
        slots.insert("genus".into(), "genus:\"Felis\"".into());
        let f = codec().decode(&slots);
        assert_eq!(f.rank(Rank::Kingdom), Some("kingdom:\"Animalia\""));
        assert_eq!(f.rank(Rank::Genus), None);
    }

    #[test]
    fn fragment_round_trip() {
        let mut slots = Slots::new();
        slots.insert("family".into(), "family:\"Felidae\"".into());
        slots.insert("typeStatus".into(), "typeStatus:\"holotype & paratype\"".into());
        let frag = to_fragment(&slots);
        assert!(!frag.contains(' '));
        assert_eq!(from_fragment(&frag), slots);
        assert_eq!(from_fragment(&format!("#{}", frag)), slots);
        assert!(from_fragment("").is_empty());
        assert!(from_fragment("#").is_empty());
    }

    #[test]
    fn location_hides_own_writes() {
        let loc = Location::new(Slots::new());
        let mut w = loc.subscribe();
        let mut mine = Slots::new();
        mine.insert("kingdom".into(), "kingdom:\"Plantae\"".into());
        w.replace(mine.clone());
        assert_eq!(loc.current(), mine);
        assert!(w.take_external().is_none());

        loc.navigate(Slots::new());
        assert_eq!(w.take_external(), Some(Slots::new()));
        assert!(w.take_external().is_none());
    }

    #[tokio::test]
    async fn changed_wakes_on_external_navigation() {
        let loc = Location::from_fragment("kingdom=kingdom%3AFungi");
        let mut w = loc.subscribe();
        let other = loc.clone();
        let handle = tokio::spawn(async move { w.changed().await });
        other.navigate(from_fragment("kingdom=kingdom%3APlantae"));
        let got = handle.await.unwrap().unwrap();
        assert_eq!(got["kingdom"], "kingdom:Plantae");
        assert_eq!(loc.fragment(), "kingdom=kingdom%3APlantae");
    }
}
