use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::CastNullPolicy;
use crate::error::{EtlError, Result};

pub const ORDER_DATE: &str = "order_date";
pub const QUANTITY: &str = "quantity";
pub const PRICE: &str = "price";
pub const TOTAL_AMOUNT: &str = "total_amount";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub rows_in: usize,
    pub dropped_null_rows: usize,
    /// Rows whose `quantity` or `price` text did not parse and became null.
    pub nulled_by_cast: usize,
    pub dropped_after_cast: usize,
    pub rows_out: usize,
}

#[derive(Debug)]
pub struct TransformOutcome {
    pub frame: DataFrame,
    pub stats: TransformStats,
}

/// Null elimination, numeric coercion, then `total_amount`. The input frame is
/// left untouched.
pub fn transform(df: &DataFrame, policy: CastNullPolicy) -> Result<TransformOutcome> {
    require_columns(df, "transform", &[QUANTITY, PRICE])?;

    let rows_in = df.height();
    let complete = drop_null_rows(df)?;
    let dropped_null_rows = rows_in - complete.height();

    let typed = coerce_types(&complete)?;
    let keep = numeric_fields_present(&typed)?;
    let nulled_by_cast = keep.iter().filter(|present| !**present).count();

    let typed = match policy {
        CastNullPolicy::Retain => typed,
        CastNullPolicy::Drop if nulled_by_cast > 0 => {
            let mask = BooleanChunked::from_slice("keep".into(), &keep);
            typed.filter(&mask)?
        }
        CastNullPolicy::Drop => typed,
    };
    let dropped_after_cast = complete.height() - typed.height();

    let frame = add_total_amount(&typed)?;
    let stats = TransformStats {
        rows_in,
        dropped_null_rows,
        nulled_by_cast,
        dropped_after_cast,
        rows_out: frame.height(),
    };

    info!(
        rows_in = stats.rows_in,
        dropped_null_rows = stats.dropped_null_rows,
        nulled_by_cast = stats.nulled_by_cast,
        dropped_after_cast = stats.dropped_after_cast,
        rows_out = stats.rows_out,
        policy = %policy,
        "transformed orders"
    );

    Ok(TransformOutcome { frame, stats })
}

/// Remove every row holding a null in any column.
pub fn drop_null_rows(df: &DataFrame) -> Result<DataFrame> {
    Ok(df.drop_nulls::<String>(None)?)
}

/// Cast `quantity` to Int32 and `price` to Float64. Unparseable values become null.
pub fn coerce_types(df: &DataFrame) -> Result<DataFrame> {
    require_columns(df, "type coercion", &[QUANTITY, PRICE])?;

    let quantity = df.column(QUANTITY)?;
    let quantity: Column = if quantity.dtype() == &DataType::String {
        let parsed: Vec<Option<i32>> = quantity
            .str()?
            .into_iter()
            .map(|value| value.and_then(parse_int))
            .collect();
        Series::new(QUANTITY.into(), parsed).into()
    } else {
        quantity.cast(&DataType::Int32)?
    };

    let price = df.column(PRICE)?;
    let price: Column = if price.dtype() == &DataType::String {
        let parsed: Vec<Option<f64>> = price
            .str()?
            .into_iter()
            .map(|value| value.and_then(parse_double))
            .collect();
        Series::new(PRICE.into(), parsed).into()
    } else {
        price.cast(&DataType::Float64)?
    };

    let mut output = df.clone();
    output.with_column(quantity)?;
    output.with_column(price)?;
    Ok(output)
}

/// `total_amount = quantity * price`, null when either side is null.
pub fn add_total_amount(df: &DataFrame) -> Result<DataFrame> {
    require_columns(df, "total_amount", &[QUANTITY, PRICE])?;

    let quantity = df.column(QUANTITY)?.i32()?;
    let price = df.column(PRICE)?.f64()?;

    let totals: Vec<Option<f64>> = quantity
        .into_iter()
        .zip(price)
        .map(|(quantity, price)| match (quantity, price) {
            (Some(quantity), Some(price)) => Some(f64::from(quantity) * price),
            _ => None,
        })
        .collect();

    let mut output = df.clone();
    output.with_column(Series::new(TOTAL_AMOUNT.into(), totals))?;
    Ok(output)
}

pub(crate) fn require_columns(df: &DataFrame, stage: &str, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| df.get_column_index(name).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    let available: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    Err(EtlError::missing_columns(stage, &missing, &available))
}

fn numeric_fields_present(df: &DataFrame) -> Result<Vec<bool>> {
    let quantity = df.column(QUANTITY)?.i32()?;
    let price = df.column(PRICE)?.f64()?;
    Ok(quantity
        .into_iter()
        .zip(price)
        .map(|(quantity, price)| quantity.is_some() && price.is_some())
        .collect())
}

/// Integer text: surrounding whitespace and an optional sign are accepted, and a
/// fractional part is truncated (`"5.9"` -> 5). Out-of-range values are null.
pub fn parse_int(text: &str) -> Option<i32> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i32>() {
        return Some(value);
    }

    let (whole, fraction) = text.split_once('.')?;
    let digits = whole.trim_start_matches(['+', '-']);
    if digits.is_empty()
        || whole.len() - digits.len() > 1
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    whole.parse::<i32>().ok()
}

/// Floating point text, including `NaN`/`Infinity` and a trailing `d`/`f` type suffix.
pub fn parse_double(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(value) = text.parse::<f64>() {
        return Some(value);
    }
    let stripped = text.strip_suffix(['d', 'D', 'f', 'F'])?;
    if stripped.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
        stripped.parse::<f64>().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_accepts_whitespace_signs_and_fractions() {
        assert_eq!(parse_int("5"), Some(5));
        assert_eq!(parse_int(" 12 "), Some(12));
        assert_eq!(parse_int("+7"), Some(7));
        assert_eq!(parse_int("-3"), Some(-3));
        assert_eq!(parse_int("5.9"), Some(5));
        assert_eq!(parse_int("5."), Some(5));
    }

    #[test]
    fn parse_int_rejects_garbage_and_overflow() {
        assert_eq!(parse_int("abc"), None);
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int(".5"), None);
        assert_eq!(parse_int("1e3"), None);
        assert_eq!(parse_int("--1"), None);
        assert_eq!(parse_int("99999999999"), None);
        assert_eq!(parse_int("1.2.3"), None);
    }

    #[test]
    fn parse_double_accepts_common_spellings() {
        assert_eq!(parse_double("10.0"), Some(10.0));
        assert_eq!(parse_double(" 2.5 "), Some(2.5));
        assert_eq!(parse_double("1e2"), Some(100.0));
        assert_eq!(parse_double("3.5d"), Some(3.5));
        assert_eq!(parse_double("4F"), Some(4.0));
        assert_eq!(parse_double("Infinity"), Some(f64::INFINITY));
        assert!(parse_double("NaN").is_some_and(f64::is_nan));
    }

    #[test]
    fn parse_double_rejects_garbage() {
        assert_eq!(parse_double("ten"), None);
        assert_eq!(parse_double(""), None);
        assert_eq!(parse_double("d"), None);
        assert_eq!(parse_double("1,5"), None);
    }
}
