//! Identity records: RFID cards and MAC-authenticated vehicles

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Prefix stations put in front of a vehicle MAC used as id tag.
pub const MAC_PREFIX: &str = "MAC";

/// IdTag authorization status (OCPP 1.6 subset used here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTagStatus {
    Accepted,
    Blocked,
    Expired,
}

impl std::fmt::Display for IdTagStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Expired => write!(f, "Expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Card,
    Mac,
}

/// One known card or vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub authorized: bool,
    /// Energy booked from finished transactions (Wh)
    #[serde(default)]
    pub energy_charged: i64,
    /// Transactions booked onto this identity
    #[serde(default)]
    pub tx_list: BTreeSet<i32>,
}

impl Identity {
    pub fn authorized() -> Self {
        Self {
            authorized: true,
            ..Self::default()
        }
    }

    pub fn auth_status(&self) -> IdTagStatus {
        if self.authorized {
            IdTagStatus::Accepted
        } else {
            IdTagStatus::Expired
        }
    }
}

/// All identities, as stored in the identity file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityBook {
    #[serde(default)]
    pub cards: HashMap<String, Identity>,
    #[serde(default)]
    pub macs: HashMap<String, Identity>,
}

impl IdentityBook {
    pub fn get(&self, id_tag: &str) -> Option<&Identity> {
        match classify_id_tag(id_tag) {
            (IdentityKind::Mac, mac) => self.macs.get(mac),
            (IdentityKind::Card, card) => self.cards.get(card),
        }
    }

    pub fn get_mut(&mut self, id_tag: &str) -> Option<&mut Identity> {
        match classify_id_tag(id_tag) {
            (IdentityKind::Mac, mac) => self.macs.get_mut(mac),
            (IdentityKind::Card, card) => self.cards.get_mut(card),
        }
    }

    /// Unknown tags are blocked; known but unauthorized ones are expired.
    pub fn authorize(&self, id_tag: &str) -> IdTagStatus {
        self.get(id_tag)
            .map(Identity::auth_status)
            .unwrap_or(IdTagStatus::Blocked)
    }

    pub fn len(&self) -> usize {
        self.cards.len() + self.macs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a raw id tag into lookup kind and key.
pub fn classify_id_tag(id_tag: &str) -> (IdentityKind, &str) {
    match id_tag.strip_prefix(MAC_PREFIX) {
        Some(mac) if !mac.is_empty() => (IdentityKind::Mac, mac),
        _ => (IdentityKind::Card, id_tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> IdentityBook {
        let mut book = IdentityBook::default();
        book.cards.insert("04A1B2".into(), Identity::authorized());
        book.cards.insert("DEAD01".into(), Identity::default());
        book.macs.insert("AA:BB:CC".into(), Identity::authorized());
        book
    }

    #[test]
    fn mac_prefix_is_stripped() {
        assert_eq!(classify_id_tag("MACAA:BB:CC"), (IdentityKind::Mac, "AA:BB:CC"));
        assert_eq!(classify_id_tag("04A1B2"), (IdentityKind::Card, "04A1B2"));
        assert_eq!(classify_id_tag("MAC"), (IdentityKind::Card, "MAC"));
    }

    #[test]
    fn authorize_statuses() {
        let book = book();
        assert_eq!(book.authorize("04A1B2"), IdTagStatus::Accepted);
        assert_eq!(book.authorize("DEAD01"), IdTagStatus::Expired);
        assert_eq!(book.authorize("FFFF"), IdTagStatus::Blocked);
        assert_eq!(book.authorize("MACAA:BB:CC"), IdTagStatus::Accepted);
        assert_eq!(book.authorize("AA:BB:CC"), IdTagStatus::Blocked);
    }

    #[test]
    fn identity_file_layout() {
        let json = r#"{"cards":{"04A1B2":{"authorized":true,"energy_charged":1200}},"macs":{}}"#;
        let book: IdentityBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.cards["04A1B2"].energy_charged, 1200);
        assert!(book.cards["04A1B2"].tx_list.is_empty());
        assert_eq!(book.len(), 1);
    }
}
