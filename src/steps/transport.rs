//! Transport kinds and sets of them.

use serde::{Deserialize, Serialize};

/// A way of executing a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Firefox,
    Chrome,
    Requests,
}

impl ClientType {
    /// Every transport, in preference order.
    pub const ALL: [ClientType; 3] = [ClientType::Firefox, ClientType::Chrome, ClientType::Requests];

    pub fn is_browser(self) -> bool {
        !matches!(self, ClientType::Requests)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientType::Firefox => "firefox",
            ClientType::Chrome => "chrome",
            ClientType::Requests => "requests",
        }
    }

    fn bit(self) -> u8 {
        match self {
            ClientType::Firefox => 0b001,
            ClientType::Chrome => 0b010,
            ClientType::Requests => 0b100,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of transports. Iteration follows `ClientType::ALL` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransportSet(u8);

impl TransportSet {
    pub const EMPTY: TransportSet = TransportSet(0);
    pub const ALL: TransportSet = TransportSet(0b111);
    pub const REQUESTS: TransportSet = TransportSet(0b100);
    pub const BROWSERS: TransportSet = TransportSet(0b011);
    pub const FIREFOX: TransportSet = TransportSet(0b001);
    pub const CHROME: TransportSet = TransportSet(0b010);

    pub fn contains(self, client: ClientType) -> bool {
        self.0 & client.bit() != 0
    }

    pub fn intersect(self, other: TransportSet) -> TransportSet {
        TransportSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ClientType> {
        ClientType::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    /// First browser in the set, in preference order.
    pub fn first_browser(self) -> Option<ClientType> {
        self.iter().find(|c| c.is_browser())
    }
}

impl FromIterator<ClientType> for TransportSet {
    fn from_iter<I: IntoIterator<Item = ClientType>>(iter: I) -> Self {
        TransportSet(iter.into_iter().fold(0, |bits, c| bits | c.bit()))
    }
}

impl std::fmt::Display for TransportSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<&str> = self.iter().map(ClientType::as_str).collect();
        f.write_str(&names.join(", "))
    }
}
