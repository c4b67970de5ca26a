//! Priority tiers and the sorting of extension batches.
//!
//! Every extension and interceptor declares one [`Tier`]. The tiers decide which *phase* picks the
//! extension up (all the `Eager` ones run before any `Ordered` one is even looked at), while the
//! order values inside them decide the order within one batch.
//!
//! Sorting of a batch is done by [`sort`]. It uses either the [`Comparator`] configured on the
//! [`Registry`][crate::registry::Registry], or [`default_order`] if there's none.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

/// The order value with the highest precedence.
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// The order value with the lowest precedence.
///
/// This is also what an [`Unordered`][Tier::Unordered] extension is treated as when compared.
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// The priority tier of an extension or interceptor.
///
/// Note that the tier is declared on the [`Definition`][crate::registry::Definition], so it can be
/// checked without creating the instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Tier {
    /// Runs before anything else of its kind.
    ///
    /// The order value sorts the eager ones among themselves.
    Eager(i32),

    /// Runs after the eager ones, in ascending order of the value.
    Ordered(i32),

    /// No guarantees, runs last.
    Unordered,
}

impl Tier {
    /// The declared order value, if any.
    pub fn order(self) -> Option<i32> {
        match self {
            Tier::Eager(order) | Tier::Ordered(order) => Some(order),
            Tier::Unordered => None,
        }
    }

    /// Is this the [`Eager`][Tier::Eager] tier?
    pub fn is_eager(self) -> bool {
        matches!(self, Tier::Eager(_))
    }

    /// Is this the [`Ordered`][Tier::Ordered] tier?
    pub fn is_ordered(self) -> bool {
        matches!(self, Tier::Ordered(_))
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Unordered
    }
}

impl Display for Tier {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        match self {
            Tier::Eager(order) => write!(fmt, "eager({})", order),
            Tier::Ordered(order) => write!(fmt, "ordered({})", order),
            Tier::Unordered => write!(fmt, "unordered"),
        }
    }
}

/// What a [`Comparator`] gets to look at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rank<'a> {
    /// Name of the extension.
    pub name: &'a str,
    /// Its declared tier.
    pub tier: Tier,
}

/// A custom ordering of extensions within a batch.
///
/// Set with [`Registry::set_comparator`][crate::registry::Registry::set_comparator] to replace
/// [`default_order`].
pub type Comparator = Arc<dyn Fn(&Rank<'_>, &Rank<'_>) -> Ordering + Send + Sync>;

/// Something that can be sorted by [`sort`].
pub trait Ranked {
    /// Provides the name and tier of the item.
    fn rank(&self) -> Rank<'_>;
}

/// The default ordering.
///
/// Eager extensions go first, then the rest by ascending order value. Extensions without an order
/// value are treated as having the [lowest precedence][LOWEST_PRECEDENCE].
pub fn default_order(a: &Rank<'_>, b: &Rank<'_>) -> Ordering {
    fn key(rank: &Rank<'_>) -> (bool, i32) {
        (
            !rank.tier.is_eager(),
            rank.tier.order().unwrap_or(LOWEST_PRECEDENCE),
        )
    }
    key(a).cmp(&key(b))
}

/// Sorts a batch in place.
///
/// Uses the `comparator` if provided, [`default_order`] otherwise. The sort is stable, so items
/// the comparator considers equal keep their discovery order.
///
/// Batches with one or no item are left alone.
pub fn sort<R: Ranked>(batch: &mut [R], comparator: Option<&Comparator>) {
    if batch.len() <= 1 {
        return;
    }
    match comparator {
        Some(cmp) => batch.sort_by(|a, b| cmp(&a.rank(), &b.rank())),
        None => batch.sort_by(|a, b| default_order(&a.rank(), &b.rank())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(&'static str, Tier);

    impl Ranked for Item {
        fn rank(&self) -> Rank<'_> {
            Rank {
                name: self.0,
                tier: self.1,
            }
        }
    }

    fn names(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.0).collect()
    }

    #[test]
    fn tiny_batches_untouched() {
        let mut empty: Vec<Item> = Vec::new();
        sort(&mut empty, None);
        assert!(empty.is_empty());

        // A comparator that would panic shows it is not even consulted.
        let cmp: Comparator =
            Arc::new(|_: &Rank<'_>, _: &Rank<'_>| -> Ordering { panic!("Must not be called") });
        let mut single = vec![Item("a", Tier::Unordered)];
        sort(&mut single, Some(&cmp));
        assert_eq!(vec!["a"], names(&single));
    }

    #[test]
    fn default_puts_eager_first_and_unordered_last() {
        let mut batch = vec![
            Item("plain", Tier::Unordered),
            Item("late", Tier::Ordered(10)),
            Item("eager", Tier::Eager(100)),
            Item("early", Tier::Ordered(-3)),
            Item("first", Tier::Eager(HIGHEST_PRECEDENCE)),
        ];
        sort(&mut batch, None);
        assert_eq!(
            vec!["first", "eager", "early", "late", "plain"],
            names(&batch)
        );
    }

    /// Equal ranks keep their relative order.
    #[test]
    fn stable() {
        let mut batch = vec![
            Item("b", Tier::Ordered(1)),
            Item("a", Tier::Ordered(1)),
            Item("x", Tier::Unordered),
            Item("c", Tier::Ordered(1)),
            Item("y", Tier::Ordered(LOWEST_PRECEDENCE)),
        ];
        sort(&mut batch, None);
        assert_eq!(vec!["b", "a", "c", "x", "y"], names(&batch));
    }

    #[test]
    fn custom_comparator() {
        let by_name: Comparator = Arc::new(|a: &Rank<'_>, b: &Rank<'_>| a.name.cmp(b.name));
        let mut batch = vec![
            Item("c", Tier::Eager(0)),
            Item("a", Tier::Unordered),
            Item("b", Tier::Ordered(1)),
        ];
        sort(&mut batch, Some(&by_name));
        assert_eq!(vec!["a", "b", "c"], names(&batch));
    }

    #[test]
    fn display() {
        assert_eq!("eager(1)", Tier::Eager(1).to_string());
        assert_eq!("ordered(-2)", Tier::Ordered(-2).to_string());
        assert_eq!("unordered", Tier::Unordered.to_string());
    }
}
