//! Shared fixtures for the matching-service integration tests
#![allow(dead_code)]

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use matching_service::domain::{ActorProfile, CertificationStatus, Currency, Gender, GeoPoint};
use matching_service::repository::InMemoryStore;
use matching_service::state::{AppState, ServiceSettings};
use std::sync::Arc;
use uuid::Uuid;

/// Centre of every test scenario
pub const PARIS: GeoPoint = GeoPoint::new(48.8566, 2.3522);

const KM_PER_DEGREE_LAT: f64 = 111.2;

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub state: AppState,
}

pub fn test_app() -> TestApp {
    test_app_with(ServiceSettings::default())
}

pub fn test_app_with(settings: ServiceSettings) -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::in_memory(store.clone(), settings);
    TestApp { store, state }
}

/// Point `km` kilometres due north of Paris
pub fn km_north(km: f64) -> GeoPoint {
    GeoPoint::new(PARIS.latitude + km / KM_PER_DEGREE_LAT, PARIS.longitude)
}

/// Birth date that makes the actor exactly `age` today, clear of any
/// birthday boundary
pub fn birth_date_for_age(age: u32) -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_months(Months::new(age * 12 + 1))
        .expect("valid birth date")
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// Complete, public, uncertified profile created a month ago
pub fn profile(gender: Gender, seeking: Gender, age: u32, location: GeoPoint) -> ActorProfile {
    let mut profile = ActorProfile::new(Uuid::new_v4(), days_ago(30));
    profile.birth_date = Some(birth_date_for_age(age));
    profile.gender = Some(gender);
    profile.seeking = Some(seeking);
    profile.location = Some(location);
    profile
}

pub fn man_seeking_woman(age: u32, location: GeoPoint) -> ActorProfile {
    profile(Gender::Man, Gender::Woman, age, location)
}

pub fn woman_seeking_man(age: u32, location: GeoPoint) -> ActorProfile {
    profile(Gender::Woman, Gender::Man, age, location)
}

/// Same profile, created just now
pub fn fresh(mut profile: ActorProfile) -> ActorProfile {
    profile.created_at = Utc::now();
    profile
}

pub fn certified(mut profile: ActorProfile) -> ActorProfile {
    profile.certification = CertificationStatus::Approved;
    profile
}

/// Register a profile and return its id
pub async fn add(store: &InMemoryStore, profile: ActorProfile) -> Uuid {
    let id = profile.id;
    store.upsert_profile(profile).await;
    id
}

/// Two bare actors with no discovery attributes
pub async fn pair(store: &InMemoryStore) -> (Uuid, Uuid) {
    let a = add(store, ActorProfile::new(Uuid::new_v4(), Utc::now())).await;
    let b = add(store, ActorProfile::new(Uuid::new_v4(), Utc::now())).await;
    (a, b)
}

pub async fn give_sparks(store: &InMemoryStore, actor_id: Uuid, count: i64) {
    store.set_stock(actor_id, Currency::Spark, count, 0).await;
}

pub async fn give_echoes(store: &InMemoryStore, actor_id: Uuid, count: i64) {
    store.set_stock(actor_id, Currency::Echo, count, 0).await;
}
