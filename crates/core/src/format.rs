//! Display helpers shared by alerts and presentation layers.

/// USD with thousands separators and two decimals: `$1,234.56`, `-$12.00`.
pub fn format_currency(amount: f64) -> String {
    if !amount.is_finite() {
        return "$0.00".to_string();
    }
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${}.{frac:02}", group_thousands(whole))
}

/// Signed percentage with two decimals: `+12.34%`, `-5.00%`.
pub fn format_percentage(percentage: f64) -> String {
    let sign = if percentage >= 0.0 { "+" } else { "" };
    format!("{sign}{percentage:.2}%")
}

/// Asset amount with precision scaled to its magnitude, followed by the symbol.
pub fn format_crypto(amount: f64, symbol: &str) -> String {
    let decimals = if amount < 1.0 {
        8
    } else if amount < 1000.0 {
        4
    } else {
        2
    };
    format!("{amount:.decimals$} {symbol}")
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
