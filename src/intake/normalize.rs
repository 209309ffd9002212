//! Field-level normalization for intake answers.

use chrono::{Datelike, NaiveDate};
use unicode_normalization::UnicodeNormalization;

use crate::models::Address;

const US_STATES: &[(&str, &str)] = &[
    ("alabama", "AL"), ("alaska", "AK"), ("arizona", "AZ"), ("arkansas", "AR"),
    ("california", "CA"), ("colorado", "CO"), ("connecticut", "CT"), ("delaware", "DE"),
    ("district of columbia", "DC"), ("florida", "FL"), ("georgia", "GA"), ("hawaii", "HI"),
    ("idaho", "ID"), ("illinois", "IL"), ("indiana", "IN"), ("iowa", "IA"),
    ("kansas", "KS"), ("kentucky", "KY"), ("louisiana", "LA"), ("maine", "ME"),
    ("maryland", "MD"), ("massachusetts", "MA"), ("michigan", "MI"), ("minnesota", "MN"),
    ("mississippi", "MS"), ("missouri", "MO"), ("montana", "MT"), ("nebraska", "NE"),
    ("nevada", "NV"), ("new hampshire", "NH"), ("new jersey", "NJ"), ("new mexico", "NM"),
    ("new york", "NY"), ("north carolina", "NC"), ("north dakota", "ND"), ("ohio", "OH"),
    ("oklahoma", "OK"), ("oregon", "OR"), ("pennsylvania", "PA"), ("rhode island", "RI"),
    ("south carolina", "SC"), ("south dakota", "SD"), ("tennessee", "TN"), ("texas", "TX"),
    ("utah", "UT"), ("vermont", "VT"), ("virginia", "VA"), ("washington", "WA"),
    ("west virginia", "WV"), ("wisconsin", "WI"), ("wyoming", "WY"),
];

/// Canonical field name for a raw form label: `"First Name"`, `"first_name"`,
/// `"firstName"` and `"fname"` all become `first_name`. Unknown labels are
/// returned snake_cased.
pub fn canonical_key(raw: &str) -> String {
    let mut snake = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                snake.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            snake.push(c.to_ascii_lowercase());
        } else {
            if !snake.ends_with('_') && !snake.is_empty() {
                snake.push('_');
            }
            prev_lower = false;
        }
    }
    let snake = snake.trim_end_matches('_').to_string();
    let squashed: String = snake.chars().filter(|c| *c != '_').collect();

    let alias = match squashed.as_str() {
        "firstname" | "fname" | "first" | "givenname" => "first_name",
        "lastname" | "lname" | "last" | "surname" | "familyname" => "last_name",
        "name" | "fullname" | "yourname" => "full_name",
        "email" | "emailaddress" | "mail" | "youremail" => "email",
        "phone" | "phonenumber" | "mobile" | "mobilephone" | "cell" | "cellphone" | "tel" => {
            "phone"
        }
        "dob" | "dateofbirth" | "birthdate" | "birthday" => "dob",
        "address" | "fulladdress" | "shippingaddress" | "streetaddressfull" => "address",
        "street" | "streetaddress" | "address1" | "addressline1" | "street1"
        | "addressstreet" | "line1" => "line1",
        "address2" | "addressline2" | "apt" | "suite" | "unit" | "street2" | "line2"
        | "addressapt" => "line2",
        "city" | "town" | "addresscity" => "city",
        "state" | "province" | "region" | "addressstate" => "state",
        "zip" | "zipcode" | "postalcode" | "postcode" | "addresszip" | "addresspostalcode"
        | "addresszipcode" => "zip",
        "medication" | "medicationpreference" | "preferredmedication" | "med" => "medication",
        "language" | "lang" | "locale" => "language",
        "id" | "submissionid" | "responseid" => "submission_id",
        _ => return snake,
    };
    alias.to_string()
}

fn capitalize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut at_start = true;
    for c in segment.chars() {
        if at_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_start = c == '-' || c == '\'';
    }
    out
}

/// NFKC, collapse whitespace, and fix casing when the input is all lower or
/// all upper case. Mixed-case input (`McDonald`) is left alone.
pub fn normalize_name(raw: &str) -> String {
    let nfkc: String = raw.nfkc().collect();
    let collapsed = nfkc.split_whitespace().collect::<Vec<_>>().join(" ");

    let has_lower = collapsed.chars().any(char::is_lowercase);
    let has_upper = collapsed.chars().any(char::is_uppercase);
    if has_lower && has_upper {
        return collapsed;
    }

    collapsed
        .split(' ')
        .map(capitalize_segment)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased, trimmed email, or `None` if it does not look like an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return None;
    }
    if email.chars().any(char::is_whitespace) {
        return None;
    }
    Some(email)
}

/// E.164 phone number. Ten-digit and `1`-prefixed eleven-digit numbers are
/// treated as NANP; other numbers need an explicit `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 if !trimmed.starts_with('+') => Some(format!("+1{}", digits)),
        11 if digits.starts_with('1') => Some(format!("+{}", digits)),
        8..=15 if trimmed.starts_with('+') => Some(format!("+{}", digits)),
        _ => None,
    }
}

/// Parse a date of birth into `YYYY-MM-DD`.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY`, `MM-DD-YYYY` and two-digit
/// years (`M/D/YY`, pivoting on `today`). Future dates and dates before 1900
/// are rejected.
pub fn normalize_dob(raw: &str, today: NaiveDate) -> Option<String> {
    let raw = raw.trim();
    // ISO timestamps: keep the date part
    let raw = raw.split('T').next().unwrap_or(raw);
    let parts: Vec<&str> = raw.split(['/', '-', '.']).map(str::trim).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let (year, month, day) = if parts[0].len() == 4 {
        (parts[0].parse::<i32>().ok()?, parts[1], parts[2])
    } else {
        let year = match parts[2].len() {
            4 => parts[2].parse::<i32>().ok()?,
            2 => {
                let yy = parts[2].parse::<i32>().ok()?;
                let current = today.year() % 100;
                let century = today.year() - current;
                if yy <= current { century + yy } else { century - 100 + yy }
            }
            _ => return None,
        };
        (year, parts[0], parts[1])
    };

    let date = NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)?;
    if date > today || date.year() < 1900 {
        return None;
    }
    Some(date.format("%Y-%m-%d").to_string())
}

/// Two-letter US state code from a code or full state name.
pub fn normalize_state(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_end_matches('.').to_lowercase();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.len() == 2 {
        let code = cleaned.to_uppercase();
        return US_STATES
            .iter()
            .any(|(_, c)| *c == code)
            .then_some(code);
    }
    US_STATES
        .iter()
        .find(|(name, _)| *name == cleaned)
        .map(|(_, code)| code.to_string())
}

/// `12345` or `12345-6789`.
pub fn normalize_zip(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        5 => Some(digits),
        9 => Some(format!("{}-{}", &digits[..5], &digits[5..])),
        _ => None,
    }
}

/// Split a one-line address such as `123 Main St, Apt 4, Springfield, IL 62701`.
pub fn parse_single_line_address(raw: &str) -> Address {
    let mut parts: Vec<String> = raw
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let mut address = Address {
        country: "US".to_string(),
        ..Default::default()
    };

    // Trailing country
    if parts
        .last()
        .is_some_and(|p| matches!(p.to_lowercase().as_str(), "us" | "usa" | "united states"))
    {
        parts.pop();
    }

    // "IL 62701" or "Illinois 62701", or state and zip as separate parts
    if let Some(last) = parts.pop() {
        let (state_part, zip_part) = match last.rsplit_once(' ') {
            Some((s, z)) if normalize_zip(z).is_some() => (s.to_string(), Some(z.to_string())),
            _ if normalize_zip(&last).is_some() => (parts.pop().unwrap_or_default(), Some(last.clone())),
            _ => (last.clone(), None),
        };
        if let Some(zip) = zip_part.as_deref().and_then(normalize_zip) {
            address.zip = zip;
        }
        match normalize_state(&state_part) {
            Some(state) => address.state = state,
            None => parts.push(state_part),
        }
    }

    if parts.len() >= 2 {
        address.city = parts.pop().unwrap_or_default();
    }
    if let Some(first) = parts.first() {
        address.line1 = first.clone();
    }
    if parts.len() > 1 {
        address.line2 = Some(parts[1..].join(", "));
    }
    address
}
