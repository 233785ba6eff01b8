use crate::entities::order::LineItemSnapshot;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use utoipa::ToSchema;

/// Surcharge applied to orders below the free-delivery threshold
pub const DELIVERY_FEE: Decimal = dec!(15);

/// Subtotal from which delivery is free
pub const FREE_DELIVERY_THRESHOLD: Decimal = dec!(500);

/// Amounts derived from an order's line items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderTotals {
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub delivery_fee: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
}

/// Computes subtotal, delivery fee and total. An empty order still pays delivery.
pub fn compute_totals(items: &[LineItemSnapshot]) -> OrderTotals {
    let subtotal: Decimal = items.iter().map(LineItemSnapshot::line_total).sum();
    let delivery_fee = if subtotal < FREE_DELIVERY_THRESHOLD {
        DELIVERY_FEE
    } else {
        Decimal::ZERO
    };

    OrderTotals {
        subtotal,
        delivery_fee,
        total: subtotal + delivery_fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn item(price: Decimal, quantity: u32) -> LineItemSnapshot {
        LineItemSnapshot {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price: price,
            product_title: "Dog food".into(),
        }
    }

    #[test]
    fn large_orders_ship_free() {
        let totals = compute_totals(&[item(dec!(450), 2)]);
        assert_eq!(totals.subtotal, dec!(900));
        assert_eq!(totals.delivery_fee, Decimal::ZERO);
        assert_eq!(totals.total, dec!(900));
    }

    #[test]
    fn small_orders_pay_delivery() {
        let totals = compute_totals(&[item(dec!(100), 2)]);
        assert_eq!(totals.subtotal, dec!(200));
        assert_eq!(totals.delivery_fee, dec!(15));
        assert_eq!(totals.total, dec!(215));
    }

    #[test]
    fn threshold_is_exclusive() {
        let totals = compute_totals(&[item(dec!(250), 2)]);
        assert_eq!(totals.delivery_fee, Decimal::ZERO);

        let totals = compute_totals(&[item(dec!(499.99), 1)]);
        assert_eq!(totals.delivery_fee, DELIVERY_FEE);
        assert_eq!(totals.total, dec!(514.99));
    }

    #[test]
    fn empty_order_is_only_the_surcharge() {
        let totals = compute_totals(&[]);
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.total, DELIVERY_FEE);
    }

    proptest! {
        #[test]
        fn total_is_subtotal_plus_fee(
            lines in prop::collection::vec((1u32..100_000u32, 1u32..20u32), 0..8)
        ) {
            let items: Vec<_> = lines
                .iter()
                .map(|(cents, qty)| item(Decimal::new(*cents as i64, 2), *qty))
                .collect();
            let totals = compute_totals(&items);

            let expected: Decimal = items.iter().map(|i| i.unit_price * Decimal::from(i.quantity)).sum();
            prop_assert_eq!(totals.subtotal, expected);
            prop_assert_eq!(totals.total, totals.subtotal + totals.delivery_fee);
            if totals.subtotal < dec!(500) {
                prop_assert_eq!(totals.delivery_fee, dec!(15));
            } else {
                prop_assert_eq!(totals.delivery_fee, Decimal::ZERO);
            }
        }
    }
}
