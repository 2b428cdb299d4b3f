//! Grid search: cartesian product of discrete / choice dimensions.
//!
//! Combinations are numbered in odometer order (last dimension fastest). With
//! a cap below the product size, an evenly strided subset `i * total / cap`
//! is taken so the sample still spans every dimension.

use crate::coordinator::{SearchStrategy, TrialRecord};
use crate::params::{ParamError, ParamSet, ParamSpace};

pub struct GridSearch {
    space: ParamSpace,
    /// Value count of each dimension; values are computed on decode.
    radices: Vec<usize>,
    total: u128,
    selected: usize,
    cursor: usize,
}

impl GridSearch {
    /// Fails on an invalid space or any continuous dimension.
    pub fn new(space: ParamSpace, max_combinations: Option<usize>) -> Result<Self, ParamError> {
        space.validate()?;
        let radices = space
            .params
            .iter()
            .map(|p| {
                p.value_count().ok_or_else(|| ParamError::ContinuousInGrid {
                    name: p.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total: u128 = radices
            .iter()
            .fold(1u128, |acc, &n| acc.saturating_mul(n as u128));
        let cap = max_combinations.unwrap_or(usize::MAX) as u128;
        let selected = total.min(cap) as usize;
        tracing::debug!(total = %total, selected, "grid built");
        Ok(Self {
            space,
            radices,
            total,
            selected,
            cursor: 0,
        })
    }

    /// Size of the full cartesian product.
    pub fn total_combinations(&self) -> u128 {
        self.total
    }

    /// Number of combinations this search will propose.
    pub fn len(&self) -> usize {
        self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected == 0
    }

    /// Flat odometer index of the `i`-th proposal: `floor(i * total / selected)`,
    /// split so the product cannot overflow even when `total` saturated.
    fn flat_index(&self, i: usize) -> u128 {
        let selected = self.selected as u128;
        if selected == self.total {
            return i as u128;
        }
        let i = i as u128;
        let (whole, rem) = (self.total / selected, self.total % selected);
        i * whole + i * rem / selected
    }

    fn decode(&self, mut flat: u128) -> ParamSet {
        let mut values = vec![0.0; self.radices.len()];
        for (d, &radix) in self.radices.iter().enumerate().rev() {
            let radix = radix as u128;
            values[d] = self.space.params[d].value_at((flat % radix) as usize);
            flat /= radix;
        }
        self.space
            .params
            .iter()
            .zip(values)
            .map(|(p, v)| (p.name.clone(), v))
            .collect()
    }

    /// Every proposal, in order, without advancing the cursor.
    pub fn combinations(&self) -> impl Iterator<Item = ParamSet> + '_ {
        (0..self.selected).map(|i| self.decode(self.flat_index(i)))
    }
}

impl SearchStrategy for GridSearch {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn space(&self) -> &ParamSpace {
        &self.space
    }

    fn propose_next(&mut self, _history: &[TrialRecord]) -> Option<ParamSet> {
        if self.cursor >= self.selected {
            return None;
        }
        let set = self.decode(self.flat_index(self.cursor));
        self.cursor += 1;
        Some(set)
    }

    fn is_done(&self, _history: &[TrialRecord]) -> bool {
        self.cursor >= self.selected
    }
}
