//! The shared patch-application primitive every order book merger builds
//! on: for each `(price, amount)` row in a patch, replace or delete the
//! matching row in the snapshot side, or insert it if new. Sequencing
//! validation (is this patch allowed to apply at all?) is the caller's
//! job - by the time a patch's rows reach here, the merger has already
//! decided it is safe to apply.

use super::{Level, OrderBookSide, SideOrder};

/// Apply every row of `patch` to `side` in order.
pub fn merge_side<S: SideOrder>(side: &mut OrderBookSide<S>, patch: impl IntoIterator<Item = Level>) {
    side.upsert_many(patch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::books::Bids;
    use rust_decimal_macros::dec;

    #[test]
    fn test_merge_side_applies_rows_in_order() {
        let mut side = OrderBookSide::<Bids>::new(vec![Level::new(dec!(10), dec!(1))]);
        merge_side(
            &mut side,
            vec![Level::new(dec!(10), dec!(0)), Level::new(dec!(9), dec!(3))],
        );
        assert_eq!(side.levels(), &[Level::new(dec!(9), dec!(3))]);
    }
}
