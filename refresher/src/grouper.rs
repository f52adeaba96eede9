//! Partitioning of a claimed batch by currency pair.

use ratekeeper_common::{CurrencyCode, RateRequest, RateRequestId};

/// Requests sharing one exact (base, result) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairGroup {
    pub result: CurrencyCode,
    /// Ids in input order.
    pub ids: Vec<RateRequestId>,
}

/// All pair groups under one base currency. Served by a single provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseGroup {
    pub base: CurrencyCode,
    /// Result currencies in order of first appearance.
    pub pairs: Vec<PairGroup>,
}

impl BaseGroup {
    fn new(base: CurrencyCode) -> Self {
        Self {
            base,
            pairs: Vec::new(),
        }
    }

    fn push(&mut self, result: CurrencyCode, id: RateRequestId) {
        match self.pairs.iter_mut().find(|p| p.result == result) {
            Some(group) => group.ids.push(id),
            None => self.pairs.push(PairGroup {
                result,
                ids: vec![id],
            }),
        }
    }

    /// Every id under this base, across all result currencies.
    pub fn all_ids(&self) -> Vec<RateRequestId> {
        self.pairs
            .iter()
            .flat_map(|p| p.ids.iter().copied())
            .collect()
    }

    /// Number of requests under this base.
    pub fn len(&self) -> usize {
        self.pairs.iter().map(|p| p.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Group requests by base currency, then by result currency.
///
/// Bases, result currencies and ids keep the order in which they first appear
/// in `requests`. The currency set is closed and small, so linear lookups
/// beat hashing here.
pub fn group_rates(requests: &[RateRequest]) -> Vec<BaseGroup> {
    let mut groups: Vec<BaseGroup> = Vec::new();

    for request in requests {
        let index = match groups.iter().position(|g| g.base == request.base_currency) {
            Some(index) => index,
            None => {
                groups.push(BaseGroup::new(request.base_currency));
                groups.len() - 1
            }
        };
        groups[index].push(request.result_currency, request.id);
    }

    groups
}
