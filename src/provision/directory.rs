//! Placement hierarchy: districts contain sub-districts contain facilities.
//!
//! `domains_for` narrows the hierarchy level by level. A level with a placement
//! id yields that single entry; a level without one yields every child of the
//! entries selected one level up.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use super::models::Placement;

#[derive(ToSchema, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct District {
    pub district_id: String,
    pub name: String,
}

#[derive(ToSchema, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubDistrict {
    pub sub_district_id: String,
    pub district_id: String,
    pub name: String,
}

#[derive(ToSchema, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub facility_id: String,
    pub sub_district_id: String,
    pub name: String,
}

#[derive(ToSchema, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Domains {
    pub districts: Vec<District>,
    pub sub_districts: Vec<SubDistrict>,
    pub facilities: Vec<Facility>,
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn districts(&self) -> Result<Vec<District>>;
    async fn district(&self, district_id: &str) -> Result<Option<District>>;
    async fn sub_districts_of(&self, district_id: &str) -> Result<Vec<SubDistrict>>;
    async fn sub_district(&self, sub_district_id: &str) -> Result<Option<SubDistrict>>;
    async fn facilities_of(&self, sub_district_id: &str) -> Result<Vec<Facility>>;
    async fn facility(&self, facility_id: &str) -> Result<Option<Facility>>;
}

/// Resolve the selectable domains for a placement.
///
/// Ids that no longer exist in the directory simply contribute nothing.
///
/// # Errors
/// Returns an error if the directory store fails.
pub async fn domains_for(store: &dyn DirectoryStore, placement: &Placement) -> Result<Domains> {
    let districts = match placement.district_id.as_deref() {
        Some(district_id) => store.district(district_id).await?.into_iter().collect(),
        None => store.districts().await?,
    };

    let sub_districts = match placement.sub_district_id.as_deref() {
        Some(sub_district_id) => store
            .sub_district(sub_district_id)
            .await?
            .into_iter()
            .collect(),
        None => {
            let mut all = Vec::new();
            for district in &districts {
                all.extend(store.sub_districts_of(&district.district_id).await?);
            }
            all
        }
    };

    let facilities = match placement.facility_id.as_deref() {
        Some(facility_id) => store.facility(facility_id).await?.into_iter().collect(),
        None => {
            let mut all = Vec::new();
            for sub_district in &sub_districts {
                all.extend(store.facilities_of(&sub_district.sub_district_id).await?);
            }
            all
        }
    };

    Ok(Domains {
        districts,
        sub_districts,
        facilities,
    })
}
