//! Cart pricing: line economics, tax policies, shipping and coupons.
//!
//! Everything in this module is pure computation over already-loaded data —
//! no I/O, no side effects. Callers resolve cart lines against live catalog
//! state and hand the result here.

use rust_decimal::Decimal;
use serde::Serialize;

/// How tax is computed for a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxPolicy {
    /// Per-line variant tax rates; lines without a rate contribute no tax.
    PerLine,
    /// Flat percentage of the cart subtotal, for catalogs without
    /// variant-level rates.
    Flat(Decimal),
}

/// Flat-fee shipping with an inclusive free-shipping threshold.
#[derive(Debug, Clone, Copy)]
pub struct ShippingPolicy {
    pub flat_fee: Decimal,
    pub free_threshold: Decimal,
}

impl ShippingPolicy {
    pub fn fee_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.free_threshold || subtotal.is_zero() {
            Decimal::ZERO
        } else {
            self.flat_fee
        }
    }
}

/// Buyer region relative to the store's home state, for the tax breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxRegion {
    /// Same state as the store: tax splits into equal CGST/SGST halves.
    Domestic,
    /// Different state: one integrated IGST component.
    Interstate,
}

/// Named tax components reported alongside the aggregate tax figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum TaxBreakdown {
    Split { cgst: Decimal, sgst: Decimal },
    Integrated { igst: Decimal },
}

impl TaxBreakdown {
    fn for_region(region: TaxRegion, tax: Decimal) -> Self {
        match region {
            TaxRegion::Domestic => {
                let half = (tax / Decimal::TWO).round_dp(2);
                TaxBreakdown::Split {
                    cgst: half,
                    sgst: tax - half,
                }
            }
            TaxRegion::Interstate => TaxBreakdown::Integrated { igst: tax },
        }
    }
}

/// One cart line resolved against live catalog data.
#[derive(Debug, Clone)]
pub struct PricingLine {
    pub quantity: i32,
    /// Full (list) price per unit.
    pub list_price: Decimal,
    /// Sale price per unit; only honored when strictly below `list_price`.
    pub sale_price: Option<Decimal>,
    /// Variant tax rate in percent, if any.
    pub tax_rate: Option<Decimal>,
    /// Product/variant exists and is active.
    pub available: bool,
    /// Requested quantity is covered by live stock.
    pub in_stock: bool,
}

/// Priced economics of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePricing {
    pub unit_price: Decimal,
    pub line_subtotal: Decimal,
    pub line_tax: Decimal,
    pub line_savings: Decimal,
}

/// Aggregate cart totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tax_breakdown: TaxBreakdown,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub grand_total: Decimal,
    pub can_checkout: bool,
}

/// Prices a single available line. Unavailable lines never reach this.
pub fn price_line(line: &PricingLine) -> LinePricing {
    let quantity = Decimal::from(line.quantity);
    let effective_sale = line.sale_price.filter(|sale| *sale < line.list_price);
    let unit_price = effective_sale.unwrap_or(line.list_price);
    let line_subtotal = unit_price * quantity;

    let line_tax = match line.tax_rate {
        Some(rate) if rate > Decimal::ZERO => {
            (line_subtotal * rate / Decimal::ONE_HUNDRED).round_dp(2)
        }
        _ => Decimal::ZERO,
    };

    let line_savings = effective_sale
        .map(|sale| (line.list_price - sale) * quantity)
        .unwrap_or(Decimal::ZERO);

    LinePricing {
        unit_price,
        line_subtotal,
        line_tax,
        line_savings,
    }
}

/// Flat coupon rules: code, discount, minimum subtotal.
const COUPONS: &[(&str, Decimal, Decimal)] = &[
    ("SAVE10", Decimal::from_parts(100, 0, 0, false, 0), Decimal::from_parts(1000, 0, 0, false, 0)),
    ("SAVE20", Decimal::from_parts(200, 0, 0, false, 0), Decimal::from_parts(2000, 0, 0, false, 0)),
];

/// Returns the flat discount for a coupon code. Unknown or ineligible codes
/// yield zero, never an error.
pub fn apply_coupon(code: Option<&str>, subtotal: Decimal) -> Decimal {
    let Some(code) = code else {
        return Decimal::ZERO;
    };

    COUPONS
        .iter()
        .find(|(known, _, min)| *known == code && subtotal >= *min)
        .map(|(_, discount, _)| *discount)
        .unwrap_or(Decimal::ZERO)
}

/// Computes the full cart summary.
///
/// Lines whose product or variant is unavailable contribute nothing to the
/// totals and clear `can_checkout`; they stay visible so the user can remove
/// them. Out-of-stock lines are still priced but also clear `can_checkout`.
pub fn compute_cart_summary(
    lines: &[PricingLine],
    tax_policy: TaxPolicy,
    shipping_policy: &ShippingPolicy,
    region: TaxRegion,
    coupon_code: Option<&str>,
) -> CartSummary {
    let mut subtotal = Decimal::ZERO;
    let mut per_line_tax = Decimal::ZERO;
    let mut can_checkout = !lines.is_empty();

    for line in lines {
        if !line.available {
            can_checkout = false;
            continue;
        }
        if !line.in_stock {
            can_checkout = false;
        }

        let priced = price_line(line);
        subtotal += priced.line_subtotal;
        per_line_tax += priced.line_tax;
    }

    let tax = match tax_policy {
        TaxPolicy::PerLine => per_line_tax,
        TaxPolicy::Flat(rate) => (subtotal * rate / Decimal::ONE_HUNDRED).round_dp(2),
    };

    let shipping = shipping_policy.fee_for(subtotal);
    let discount = apply_coupon(coupon_code, subtotal);
    let grand_total = (subtotal + tax + shipping - discount).max(Decimal::ZERO);

    CartSummary {
        subtotal,
        tax,
        tax_breakdown: TaxBreakdown::for_region(region, tax),
        discount,
        shipping,
        grand_total,
        can_checkout,
    }
}
