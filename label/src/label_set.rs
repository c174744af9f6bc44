use crate::{Finding, ParseLabelError, NO_FINDING, NUM_FINDINGS};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Display, Formatter},
    iter::FromIterator,
    ops::Index,
    str::FromStr,
};

/// A set of findings attached to one image.
///
/// The empty set stands for "No Finding". Both "No Finding" and the empty
/// string decode to it, and it encodes to "No Finding".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LabelSet {
    bits: u16,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, finding: Finding) -> bool {
        let had = self.contains(finding);
        self.bits |= 1 << finding.index();
        !had
    }

    pub fn remove(&mut self, finding: Finding) -> bool {
        let had = self.contains(finding);
        self.bits &= !(1 << finding.index());
        had
    }

    pub fn contains(&self, finding: Finding) -> bool {
        self.bits & (1 << finding.index()) != 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterate over the findings in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Finding> + '_ {
        Finding::all().filter(move |&finding| self.contains(finding))
    }

    /// Encode the set into a fixed-length binary vector.
    pub fn to_vector(&self) -> LabelVector {
        let mut bits = [false; NUM_FINDINGS];
        self.iter().for_each(|finding| bits[finding.index()] = true);
        LabelVector { bits }
    }

    /// Decode a pipe-delimited label string such as "Effusion|Cardiomegaly".
    pub fn parse(text: &str) -> Result<Self, ParseLabelError> {
        let text = text.trim();
        if text.is_empty() || text == NO_FINDING {
            return Ok(Self::new());
        }

        let mut set = Self::new();
        for name in text.split('|') {
            if name.trim() == NO_FINDING {
                return Err(ParseLabelError::MixedNoFinding(text.to_owned()));
            }
            set.insert(Finding::parse_name(name)?);
        }
        Ok(set)
    }
}

impl FromStr for LabelSet {
    type Err = ParseLabelError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl Display for LabelSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{}", NO_FINDING);
        }

        let mut iter = self.iter();
        if let Some(first) = iter.next() {
            write!(f, "{}", first.name())?;
        }
        iter.try_for_each(|finding| write!(f, "|{}", finding.name()))
    }
}

impl FromIterator<Finding> for LabelSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Finding>,
    {
        let mut set = Self::new();
        iter.into_iter().for_each(|finding| {
            set.insert(finding);
        });
        set
    }
}

impl From<&LabelVector> for LabelSet {
    fn from(vector: &LabelVector) -> Self {
        vector.positives().collect()
    }
}

impl Serialize for LabelSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LabelSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// The binary multi-label target of one image, one entry per [Finding].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelVector {
    bits: [bool; NUM_FINDINGS],
}

impl LabelVector {
    pub fn zeros() -> Self {
        Self {
            bits: [false; NUM_FINDINGS],
        }
    }

    pub fn from_bits(bits: [bool; NUM_FINDINGS]) -> Self {
        Self { bits }
    }

    /// Always [NUM_FINDINGS].
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn bits(&self) -> &[bool; NUM_FINDINGS] {
        &self.bits
    }

    /// The vector as 0.0/1.0 values, the layout of training targets.
    pub fn to_f32(&self) -> [f32; NUM_FINDINGS] {
        let mut values = [0.0; NUM_FINDINGS];
        values
            .iter_mut()
            .zip(self.bits.iter())
            .for_each(|(value, &bit)| *value = if bit { 1.0 } else { 0.0 });
        values
    }

    pub fn positives(&self) -> impl Iterator<Item = Finding> + '_ {
        Finding::all().filter(move |finding| self.bits[finding.index()])
    }

    pub fn to_set(&self) -> LabelSet {
        LabelSet::from(self)
    }
}

impl Default for LabelVector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl Index<Finding> for LabelVector {
    type Output = bool;

    fn index(&self, finding: Finding) -> &Self::Output {
        &self.bits[finding.index()]
    }
}

impl From<LabelSet> for LabelVector {
    fn from(set: LabelSet) -> Self {
        set.to_vector()
    }
}
