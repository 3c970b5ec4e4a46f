use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{OrderIntent, OrderSource, OrderType, Side};

/// Sheet the upstream spreadsheet parser reads orders from.
pub const ORDER_SHEET_NAME: &str = "purchase order";

/// One parsed spreadsheet row, as delivered by the external parser.
/// Numeric cells arrive pre-parsed or absent; this module never sees raw
/// cell text except for the side token.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRow {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Option<String>,
    pub qty: Option<Decimal>,
    pub price: Option<Decimal>,
}

/// A row that could not become an intent; the batch continues without it.
#[derive(Debug, Clone)]
pub struct RowError {
    /// 1-based spreadsheet row (header is row 1).
    pub row: usize,
    pub error: String,
}

/// Recognize an order side token.
///
/// Accepts English BUY/SELL and the localized MUA/BÁN, case-insensitive.
/// Anything else — including an empty cell — defaults to BUY.
pub fn detect_order_side(token: Option<&str>) -> Side {
    let Some(token) = token else {
        return Side::Buy;
    };
    match token.trim().to_uppercase().as_str() {
        "SELL" | "BÁN" => Side::Sell,
        _ => Side::Buy,
    }
}

/// Convert parsed rows into order intents for the approval queue.
///
/// Rows with missing or non-positive numerics are skipped with a per-row
/// error; the rest of the batch is unaffected.
pub fn rows_to_intents(rows: &[OrderRow]) -> (Vec<OrderIntent>, Vec<RowError>) {
    let mut intents = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        // Row 1 is the header; data starts at row 2.
        let sheet_row = index + 2;

        if row.symbol.trim().is_empty() {
            errors.push(RowError {
                row: sheet_row,
                error: "missing symbol".into(),
            });
            continue;
        }
        let Some(qty) = row.qty else {
            errors.push(RowError {
                row: sheet_row,
                error: "missing or non-numeric quantity".into(),
            });
            continue;
        };
        let Some(price) = row.price else {
            errors.push(RowError {
                row: sheet_row,
                error: "missing or non-numeric price".into(),
            });
            continue;
        };
        if qty <= Decimal::ZERO {
            errors.push(RowError {
                row: sheet_row,
                error: format!("quantity must be positive, got {qty}"),
            });
            continue;
        }
        if price <= Decimal::ZERO {
            errors.push(RowError {
                row: sheet_row,
                error: format!("price must be positive, got {price}"),
            });
            continue;
        }

        intents.push(OrderIntent {
            client_order_id: Some(row.client_order_id.trim().to_string()),
            symbol: row.symbol.trim().to_string(),
            side: detect_order_side(row.side.as_deref()),
            order_type: OrderType::Market,
            qty: Some(qty),
            pips: None,
            price,
            stop_price: None,
            source: OrderSource::Spreadsheet,
            source_ref: None,
            strategy_name: None,
            confidence: None,
            note: None,
        });
    }

    (intents, errors)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(client: &str, symbol: &str, side: Option<&str>, qty: Option<Decimal>, price: Option<Decimal>) -> OrderRow {
        OrderRow {
            client_order_id: client.into(),
            symbol: symbol.into(),
            side: side.map(String::from),
            qty,
            price,
        }
    }

    #[test]
    fn test_detect_order_side_tokens() {
        assert_eq!(detect_order_side(Some("SELL")), Side::Sell);
        assert_eq!(detect_order_side(Some("sell")), Side::Sell);
        assert_eq!(detect_order_side(Some("BÁN")), Side::Sell);
        assert_eq!(detect_order_side(Some("bán")), Side::Sell);
        assert_eq!(detect_order_side(Some("BUY")), Side::Buy);
        assert_eq!(detect_order_side(Some("MUA")), Side::Buy);
        // Unrecognized tokens and empty cells default to BUY.
        assert_eq!(detect_order_side(Some("hold")), Side::Buy);
        assert_eq!(detect_order_side(None), Side::Buy);
    }

    #[test]
    fn test_rows_to_intents_happy_path() {
        let rows = vec![
            row("001", "BTC", None, Some(dec!(1)), Some(dec!(50000))),
            row("002", "ETH", Some("SELL"), Some(dec!(2)), Some(dec!(3000))),
        ];
        let (intents, errors) = rows_to_intents(&rows);
        assert!(errors.is_empty());
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].side, Side::Buy);
        assert_eq!(intents[0].source, OrderSource::Spreadsheet);
        assert_eq!(intents[1].side, Side::Sell);
        assert_eq!(intents[1].client_order_id.as_deref(), Some("002"));
    }

    #[test]
    fn test_bad_rows_are_skipped_and_reported() {
        let rows = vec![
            row("001", "BTC", None, Some(dec!(1)), Some(dec!(50000))),
            row("002", "", None, Some(dec!(1)), Some(dec!(100))),
            row("003", "ETH", None, None, Some(dec!(100))),
            row("004", "SOL", None, Some(dec!(-5)), Some(dec!(100))),
            row("005", "ADA", None, Some(dec!(5)), None),
        ];
        let (intents, errors) = rows_to_intents(&rows);
        assert_eq!(intents.len(), 1);
        assert_eq!(errors.len(), 4);
        // Errors carry 1-based sheet rows (data starts at row 2).
        assert_eq!(errors[0].row, 3);
        assert_eq!(errors[1].row, 4);
    }
}
