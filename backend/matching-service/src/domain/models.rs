use super::geo::GeoPoint;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declared or sought gender.
///
/// Two buckets only: reciprocity matching compares declared against sought
/// and does not model anything finer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Man,
    Woman,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Man => "man",
            Gender::Woman => "woman",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "man" => Ok(Gender::Man),
            "woman" => Ok(Gender::Woman),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    #[default]
    None,
    Pending,
    Approved,
    Rejected,
}

impl CertificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificationStatus::None => "none",
            CertificationStatus::Pending => "pending",
            CertificationStatus::Approved => "approved",
            CertificationStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for CertificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CertificationStatus::None),
            "pending" => Ok(CertificationStatus::Pending),
            "approved" => Ok(CertificationStatus::Approved),
            "rejected" => Ok(CertificationStatus::Rejected),
            other => Err(format!("unknown certification status: {}", other)),
        }
    }
}

/// Actor profile as supplied by the profile/location collaborator.
///
/// Read-only to this service. Moderation flags are written elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub id: Uuid,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub seeking: Option<Gender>,
    /// Precise point, or the postal-code centroid when no point is stored
    pub location: Option<GeoPoint>,
    pub certification: CertificationStatus,
    pub is_public: bool,
    pub certified_viewers_only: bool,
    pub shadow_restricted: bool,
    pub created_at: DateTime<Utc>,
}

impl ActorProfile {
    /// Profile with default visibility flags and no discovery attributes.
    pub fn new(id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            birth_date: None,
            gender: None,
            seeking: None,
            location: None,
            certification: CertificationStatus::None,
            is_public: true,
            certified_viewers_only: false,
            shadow_restricted: false,
            created_at,
        }
    }

    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|birth| age_between(birth, today))
    }

    /// The attributes discovery needs; `None` when any of them is missing.
    pub fn discovery_attributes(&self, today: NaiveDate) -> Option<DiscoveryAttributes> {
        Some(DiscoveryAttributes {
            age: self.age_on(today)?,
            gender: self.gender?,
            seeking: self.seeking?,
            location: self.location?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryAttributes {
    pub age: u32,
    pub gender: Gender,
    pub seeking: Gender,
    pub location: GeoPoint,
}

fn age_between(birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if birth > today {
        return None;
    }
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Spark,
    Echo,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Spark => "spark",
            Currency::Echo => "echo",
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spark" => Ok(Currency::Spark),
            "echo" => Ok(Currency::Echo),
            other => Err(format!("unknown currency: {}", other)),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component of a stock a credit lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockComponent {
    /// Renewed by the subscription cycle
    Periodic,
    /// Bought, never expires
    Purchased,
}

/// Per-actor, per-currency balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftStock {
    pub actor_id: Uuid,
    pub currency: Currency,
    pub periodic: i64,
    pub purchased: i64,
}

impl GiftStock {
    pub fn empty(actor_id: Uuid, currency: Currency) -> Self {
        Self {
            actor_id,
            currency,
            periodic: 0,
            purchased: 0,
        }
    }

    pub fn balance(&self) -> i64 {
        self.periodic + self.purchased
    }

    /// Take one unit, periodic first. Returns false when nothing is left.
    pub fn debit_one(&mut self) -> bool {
        if self.periodic > 0 {
            self.periodic -= 1;
            true
        } else if self.purchased > 0 {
            self.purchased -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Like {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparkStatus {
    Active,
    Withdrawn,
    Expired,
}

impl SparkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SparkStatus::Active => "active",
            SparkStatus::Withdrawn => "withdrawn",
            SparkStatus::Expired => "expired",
        }
    }
}

impl FromStr for SparkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SparkStatus::Active),
            "withdrawn" => Ok(SparkStatus::Withdrawn),
            "expired" => Ok(SparkStatus::Expired),
            other => Err(format!("unknown spark status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spark {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: SparkStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Spark {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SparkStatus::Active && self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoState {
    Offered,
    Returned,
    Declined,
    Expired,
}

impl EchoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EchoState::Offered => "offered",
            EchoState::Returned => "returned",
            EchoState::Declined => "declined",
            EchoState::Expired => "expired",
        }
    }
}

impl FromStr for EchoState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offered" => Ok(EchoState::Offered),
            "returned" => Ok(EchoState::Returned),
            "declined" => Ok(EchoState::Declined),
            "expired" => Ok(EchoState::Expired),
            other => Err(format!("unknown echo state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoOffer {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub state: EchoState,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl EchoOffer {
    /// Still waiting for the receiver's response
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.state == EchoState::Offered && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Receiver's answer to an echo offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoResponse {
    Return,
    Decline,
}

impl EchoResponse {
    pub fn target_state(&self) -> EchoState {
        match self {
            EchoResponse::Return => EchoState::Returned,
            EchoResponse::Decline => EchoState::Declined,
        }
    }
}

/// Result of applying an `EchoResponse` at the storage layer
#[derive(Debug, Clone, PartialEq)]
pub enum EchoTransition {
    /// The offer moved from `offered` to the requested state
    Applied(EchoOffer),
    /// A previous identical response already closed the offer
    Unchanged(EchoOffer),
    NotFound,
}

/// Summary of gift state between a viewer and another actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct GiftStatus {
    pub liked: bool,
    pub liked_by: bool,
    pub spark_sent: bool,
    pub spark_received: bool,
    pub echo_offered: bool,
    pub echo_received: bool,
    pub echo_returned: bool,
}

impl GiftStatus {
    pub fn mutual_spark(&self) -> bool {
        self.spark_sent && self.spark_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_age_counts_birthday_boundary() {
        let mut profile = ActorProfile::new(Uuid::new_v4(), Utc::now());
        profile.birth_date = Some(date(1990, 6, 15));

        assert_eq!(profile.age_on(date(2020, 6, 14)), Some(29));
        assert_eq!(profile.age_on(date(2020, 6, 15)), Some(30));
        assert_eq!(profile.age_on(date(1980, 1, 1)), None);
    }

    #[test]
    fn test_discovery_attributes_require_all_fields() {
        let mut profile = ActorProfile::new(Uuid::new_v4(), Utc::now());
        profile.birth_date = Some(date(1995, 1, 1));
        profile.gender = Some(Gender::Woman);
        profile.seeking = Some(Gender::Man);
        assert!(profile.discovery_attributes(date(2024, 1, 1)).is_none());

        profile.location = Some(GeoPoint::new(48.8566, 2.3522));
        let attrs = profile.discovery_attributes(date(2024, 1, 1)).unwrap();
        assert_eq!(attrs.age, 29);
    }

    #[test]
    fn test_debit_drains_periodic_before_purchased() {
        let mut stock = GiftStock {
            actor_id: Uuid::new_v4(),
            currency: Currency::Spark,
            periodic: 1,
            purchased: 1,
        };

        assert!(stock.debit_one());
        assert_eq!((stock.periodic, stock.purchased), (0, 1));
        assert!(stock.debit_one());
        assert_eq!((stock.periodic, stock.purchased), (0, 0));
        assert!(!stock.debit_one());
        assert_eq!(stock.balance(), 0);
    }
}
