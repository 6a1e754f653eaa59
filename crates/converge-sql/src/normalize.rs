//! Column type and default value normalization.
//!
//! Declarations are written the way people write DDL (`INT AUTO_INCREMENT
//! PRIMARY KEY`, `DECIMAL(15, 2)`, `BOOLEAN`), while catalogs report their own
//! spelling (`int`, `decimal(15,2)`, `tinyint(1)`). Both sides go through the
//! same functions here before they are compared, so equal types compare equal
//! as plain strings.

use crate::Dialect;

/// Canonicalize a column type string.
///
/// Lower-cases, collapses internal whitespace, and strips the
/// `auto_increment` and `primary key` annotations. Parameterized widths are
/// kept, so `varchar(255)` and `varchar(500)` stay distinct. Unknown tokens
/// pass through unchanged.
///
/// # Examples
///
/// ```
/// use converge_sql::normalize_type;
/// assert_eq!(normalize_type("INT AUTO_INCREMENT PRIMARY KEY"), "int");
/// assert_eq!(normalize_type("VARCHAR(255)"), "varchar(255)");
/// assert_eq!(normalize_type("  Timestamp   "), "timestamp");
/// ```
pub fn normalize_type(type_string: &str) -> String {
    let lowered = type_string.to_lowercase();

    let mut kept: Vec<&str> = Vec::new();
    for token in lowered.split_whitespace() {
        match token {
            "auto_increment" => {}
            "key" if kept.last() == Some(&"primary") => {
                kept.pop();
            }
            other => kept.push(other),
        }
    }

    kept.join(" ")
}

/// Whether a declared type string marks its column as the primary key.
pub fn is_primary_key_type(type_string: &str) -> bool {
    let lowered = type_string.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    tokens.windows(2).any(|w| w == ["primary", "key"])
}

impl Dialect {
    /// Canonicalize a type for comparison against this dialect's catalog.
    ///
    /// Applies [`normalize_type`], removes whitespace inside parentheses and
    /// then maps the common aliases onto the spelling the catalog reports.
    ///
    /// ```
    /// use converge_sql::Dialect;
    /// assert_eq!(Dialect::MySql.canonical_type("DECIMAL(15, 2)"), "decimal(15,2)");
    /// assert_eq!(Dialect::MySql.canonical_type("BOOLEAN"), "tinyint(1)");
    /// assert_eq!(Dialect::MySql.canonical_type("int(11)"), "int");
    /// assert_eq!(Dialect::Postgres.canonical_type("VARCHAR(255)"), "character varying(255)");
    /// assert_eq!(Dialect::Postgres.canonical_type("SERIAL PRIMARY KEY"), "integer");
    /// ```
    pub fn canonical_type(self, type_string: &str) -> String {
        let base = tighten_parens(&normalize_type(type_string));
        let (head, rest) = split_head(&base);
        match self {
            Dialect::MySql => canonical_mysql(head, rest),
            Dialect::Postgres => canonical_postgres(head, rest),
        }
    }

    /// Canonicalize a default value for comparison.
    ///
    /// `None` and a literal `NULL` both mean "no default". Quotes and
    /// Postgres casts are stripped, the spellings of "now" are unified,
    /// MySQL booleans become `1`/`0`, and numbers are written without
    /// redundant zeros so that `0` and `0.00` compare equal.
    ///
    /// ```
    /// use converge_sql::Dialect;
    /// let pg = Dialect::Postgres;
    /// assert_eq!(pg.canonical_default(Some("'member'::character varying")), Some("member".to_string()));
    /// assert_eq!(pg.canonical_default(Some("0.00")), Some("0".to_string()));
    /// assert_eq!(Dialect::MySql.canonical_default(Some("true")), Some("1".to_string()));
    /// assert_eq!(Dialect::MySql.canonical_default(Some("NULL")), None);
    /// ```
    pub fn canonical_default(self, raw: Option<&str>) -> Option<String> {
        let mut s = raw?.trim();

        if self == Dialect::Postgres {
            s = strip_casts(s);
        }
        s = strip_outer_parens(s);

        if let Some(unquoted) = unquote(s) {
            return Some(canonical_number(&unquoted).unwrap_or(unquoted));
        }

        let lowered = s.to_ascii_lowercase();
        match lowered.as_str() {
            "" | "null" => return None,
            "current_timestamp" | "current_timestamp()" | "now()" | "localtimestamp"
            | "localtimestamp()" | "transaction_timestamp()" => {
                return Some("current_timestamp".to_string());
            }
            "true" | "false" => {
                let value = match (self, lowered.as_str()) {
                    (Dialect::MySql, "true") => "1",
                    (Dialect::MySql, _) => "0",
                    (Dialect::Postgres, other) => other,
                };
                return Some(value.to_string());
            }
            _ => {}
        }

        Some(canonical_number(s).unwrap_or_else(|| s.to_string()))
    }
}

/// Whether a declared type takes bare (unquoted) default values.
///
/// Numeric and boolean columns do; everything else gets a quoted literal.
pub fn takes_bare_default(type_string: &str) -> bool {
    let normalized = normalize_type(type_string);
    let (head, _) = split_head(&normalized);
    matches!(
        head,
        "int"
            | "integer"
            | "tinyint"
            | "smallint"
            | "mediumint"
            | "bigint"
            | "int2"
            | "int4"
            | "int8"
            | "serial"
            | "bigserial"
            | "smallserial"
            | "decimal"
            | "numeric"
            | "dec"
            | "float"
            | "float4"
            | "float8"
            | "double"
            | "real"
            | "bool"
            | "boolean"
            | "bit"
    )
}

fn canonical_mysql(head: &str, rest: &str) -> String {
    let rest = rest.strip_suffix(" signed").unwrap_or(rest);
    match head {
        "bool" | "boolean" => "tinyint(1)".to_string(),
        "integer" => format!("int{}", drop_width(rest)),
        "tinyint" if width(rest) == Some("1") => format!("tinyint{rest}"),
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" => {
            format!("{head}{}", drop_width(rest))
        }
        "numeric" | "dec" => format!("decimal{rest}"),
        "double" if rest == " precision" => "double".to_string(),
        _ => format!("{head}{rest}"),
    }
}

fn canonical_postgres(head: &str, rest: &str) -> String {
    match head {
        "int" | "int4" | "integer" | "serial" | "serial4" => format!("integer{rest}"),
        "bigint" | "int8" | "bigserial" | "serial8" => format!("bigint{rest}"),
        "smallint" | "int2" | "smallserial" | "serial2" => format!("smallint{rest}"),
        "bool" | "boolean" => format!("boolean{rest}"),
        "varchar" => format!("character varying{rest}"),
        "char" | "bpchar" | "character" if rest.is_empty() => "character(1)".to_string(),
        "char" | "bpchar" => format!("character{rest}"),
        "decimal" | "numeric" => format!("numeric{rest}"),
        "float8" | "float" => format!("double precision{rest}"),
        "float4" => format!("real{rest}"),
        "timestamp" | "time" => {
            if rest.contains("with") {
                format!("{head}{rest}")
            } else {
                format!("{head}{rest} without time zone")
            }
        }
        "timestamptz" => format!("timestamp{rest} with time zone"),
        "timetz" => format!("time{rest} with time zone"),
        _ => format!("{head}{rest}"),
    }
}

/// Split `varchar(255)` into `("varchar", "(255)")` and
/// `timestamp with time zone` into `("timestamp", " with time zone")`.
fn split_head(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    s.split_at(end)
}

/// The parenthesized width at the start of `rest`, if any.
fn width(rest: &str) -> Option<&str> {
    let inner = rest.strip_prefix('(')?;
    let close = inner.find(')')?;
    Some(&inner[..close])
}

/// Remove a leading `(n)` display width.
fn drop_width(rest: &str) -> &str {
    match width(rest) {
        Some(w) => &rest[w.len() + 2..],
        None => rest,
    }
}

/// Remove whitespace inside parentheses (outside quotes) and before `(`.
fn tighten_parens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in s.chars() {
        if in_quote {
            out.push(c);
            if c == '\'' {
                in_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_quote = true;
                out.push(c);
            }
            '(' => {
                while out.ends_with(' ') {
                    out.pop();
                }
                depth += 1;
                out.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                out.push(c);
            }
            c if c.is_whitespace() && depth > 0 => {}
            c => out.push(c),
        }
    }

    out
}

/// Strip trailing `::type` casts that sit outside quotes.
fn strip_casts(s: &str) -> &str {
    let mut in_quote = false;
    let bytes = s.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b':' if !in_quote && bytes.get(i + 1) == Some(&b':') => return s[..i].trim_end(),
            _ => {}
        }
    }
    s
}

fn strip_outer_parens(s: &str) -> &str {
    let mut s = s;
    while let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        // `(a) + (b)` is not wrapped as a whole
        if !balanced(inner) {
            break;
        }
        s = inner.trim();
    }
    s
}

fn balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Strip one level of single quotes and undo `''` escaping.
fn unquote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

/// Write a decimal number without sign noise or redundant zeros.
///
/// Returns `None` for anything that is not a plain decimal literal.
fn canonical_number(s: &str) -> Option<String> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };

    let magnitude = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    };

    if negative && magnitude != "0" {
        Some(format!("-{magnitude}"))
    } else {
        Some(magnitude)
    }
}
