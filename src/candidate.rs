//! Candidate handles and the insertion-ordered result set.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;

/// A username being evaluated for availability.
///
/// Identity is the exact string value. Case is left exactly as read; the
/// upstream services decide whether `Foo` and `foo` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Candidate {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Candidate {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Deduplicated set of confirmed candidates that remembers insertion order
/// so the output file reads in the order handles were confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    items: Vec<Candidate>,
    seen: HashSet<Candidate>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a candidate. Returns `false` if it was already present.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if self.seen.contains(&candidate) {
            return false;
        }
        self.seen.insert(candidate.clone());
        self.items.push(candidate);
        true
    }

    /// Union `other` into `self`, returning how many entries were new.
    pub fn extend_from(&mut self, other: &ResultSet) -> usize {
        other
            .iter()
            .filter(|c| self.insert((*c).clone()))
            .count()
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.seen.contains(candidate)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.items
    }

    /// Randomize the order. Membership is unchanged.
    pub(crate) fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.items.shuffle(rng);
    }
}

impl FromIterator<Candidate> for ResultSet {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut set = ResultSet::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut set = ResultSet::new();
        assert!(set.insert("alice".into()));
        assert!(set.insert("bob".into()));
        assert!(!set.insert("alice".into()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_preserves_insertion_order() {
        let set: ResultSet = ["zed", "amy", "zed", "kim"]
            .into_iter()
            .map(Candidate::from)
            .collect();
        let names: Vec<&str> = set.iter().map(Candidate::as_str).collect();
        assert_eq!(names, vec!["zed", "amy", "kim"]);
    }

    #[test]
    fn test_case_is_significant() {
        let mut set = ResultSet::new();
        set.insert("Handle".into());
        assert!(set.insert("handle".into()), "case variants are distinct candidates");
    }

    #[test]
    fn test_extend_counts_only_new() {
        let mut a: ResultSet = ["x", "y"].into_iter().map(Candidate::from).collect();
        let b: ResultSet = ["y", "z"].into_iter().map(Candidate::from).collect();
        assert_eq!(a.extend_from(&b), 1);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_shuffle_keeps_membership() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut set: ResultSet = ["a", "b", "c", "d"].into_iter().map(Candidate::from).collect();
        set.shuffle(&mut StdRng::seed_from_u64(5));
        assert_eq!(set.len(), 4);
        assert!(!set.insert("c".into()));
        let mut names: Vec<&str> = set.iter().map(Candidate::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }
}
