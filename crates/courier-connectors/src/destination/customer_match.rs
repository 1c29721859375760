//! Audience member uploads, one formatter per upload key type

use std::sync::LazyLock;

use courier_core::{ErrorCode, Event, PayloadFormatter, required_str};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

static MOBILE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid mobile id regex")
});

/// How audience members are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKeyType {
    /// Hashed email and/or phone
    ContactInfo,
    CrmId,
    MobileAdvertisingId,
}

impl UploadKeyType {
    pub fn formatter(self) -> Box<dyn PayloadFormatter> {
        match self {
            Self::ContactInfo => Box::new(ContactInfoFormatter),
            Self::CrmId => Box::new(CrmIdFormatter),
            Self::MobileAdvertisingId => Box::new(MobileIdFormatter),
        }
    }
}

fn sha256_hex(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

/// Optional string field; present but non-string is invalid.
fn optional_str<'a>(event: &'a Event, key: &str) -> Result<Option<&'a str>, ErrorCode> {
    match event.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ErrorCode::InvalidPayload),
    }
}

fn normalize_email(raw: &str) -> Result<String, ErrorCode> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(ErrorCode::InvalidPayload),
    }
}

/// E.164: `+` followed by 8 to 15 digits. Separators are dropped.
fn normalize_phone(raw: &str) -> Result<String, ErrorCode> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let has_other = raw
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')));
    if has_other || !(8..=15).contains(&digits.len()) {
        return Err(ErrorCode::InvalidPayload);
    }
    Ok(format!("+{digits}"))
}

/// `email` and/or `phone`, normalized then SHA-256 hashed.
#[derive(Debug, Clone, Copy)]
pub struct ContactInfoFormatter;

impl PayloadFormatter for ContactInfoFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        let email = optional_str(event, "email")?;
        let phone = optional_str(event, "phone")?;
        if email.is_none() && phone.is_none() {
            return Err(ErrorCode::MissingRequiredField);
        }
        let mut out = Map::new();
        if let Some(email) = email {
            out.insert("hashedEmail".into(), sha256_hex(&normalize_email(email)?).into());
        }
        if let Some(phone) = phone {
            out.insert(
                "hashedPhoneNumber".into(),
                sha256_hex(&normalize_phone(phone)?).into(),
            );
        }
        Ok(Value::Object(out))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrmIdFormatter;

impl PayloadFormatter for CrmIdFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        let id = required_str(event, "crm_id")?;
        Ok(json!({ "thirdPartyUserId": id.trim() }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MobileIdFormatter;

impl PayloadFormatter for MobileIdFormatter {
    fn format(&self, event: &Event) -> Result<Value, ErrorCode> {
        let id = required_str(event, "mobile_id")?;
        if !MOBILE_ID.is_match(id) {
            return Err(ErrorCode::InvalidPayload);
        }
        Ok(json!({ "mobileId": id.to_lowercase() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(v: Value) -> Event {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn email_normalized_before_hashing() {
        let a = ContactInfoFormatter
            .format(&ev(json!({"email": "  Jane.Doe@Example.COM "})))
            .unwrap();
        let b = ContactInfoFormatter
            .format(&ev(json!({"email": "jane.doe@example.com"})))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a["hashedEmail"],
            "86e0b9e56c17cc4d12387e1949b85053fbe73bc3ce5a1188713a9d300cc6133d"
        );
    }

    #[test]
    fn phone_normalized_to_e164() {
        assert_eq!(normalize_phone("+1 (650) 555-1234").unwrap(), "+16505551234");
        assert_eq!(normalize_phone("1-650-555-1234").unwrap(), "+16505551234");
        assert_eq!(normalize_phone("555"), Err(ErrorCode::InvalidPayload));
        assert_eq!(normalize_phone("call me"), Err(ErrorCode::InvalidPayload));
    }

    #[test]
    fn contact_info_needs_one_key() {
        assert_eq!(
            ContactInfoFormatter.format(&ev(json!({"name": "x"}))),
            Err(ErrorCode::MissingRequiredField)
        );
        assert_eq!(
            ContactInfoFormatter.format(&ev(json!({"email": "not-an-email"}))),
            Err(ErrorCode::InvalidPayload)
        );
        let both = ContactInfoFormatter
            .format(&ev(json!({"email": "a@b.co", "phone": "+44 20 7946 0958"})))
            .unwrap();
        assert_eq!(both.as_object().unwrap().len(), 2);
    }

    #[test]
    fn crm_id() {
        assert_eq!(
            CrmIdFormatter.format(&ev(json!({"crm_id": "C-100"}))).unwrap(),
            json!({"thirdPartyUserId": "C-100"})
        );
        assert_eq!(
            CrmIdFormatter.format(&ev(json!({}))),
            Err(ErrorCode::MissingRequiredField)
        );
    }

    #[test]
    fn mobile_id_shape() {
        let ok = MobileIdFormatter
            .format(&ev(json!({"mobile_id": "6D92078A-8246-4BA4-AE5B-76104861E7DC"})))
            .unwrap();
        assert_eq!(ok["mobileId"], "6d92078a-8246-4ba4-ae5b-76104861e7dc");
        assert_eq!(
            MobileIdFormatter.format(&ev(json!({"mobile_id": "abc"}))),
            Err(ErrorCode::InvalidPayload)
        );
    }

    #[test]
    fn key_type_selects_formatter() {
        let f = UploadKeyType::CrmId.formatter();
        assert!(f.format(&ev(json!({"crm_id": "1"}))).is_ok());
        let key: UploadKeyType = serde_json::from_str(r#""mobile_advertising_id""#).unwrap();
        assert_eq!(key, UploadKeyType::MobileAdvertisingId);
    }
}
