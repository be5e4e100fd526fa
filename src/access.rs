//! Directory of scheduler access points per area.

use crate::error::{EdgeError, Result};
use crate::types::{AccessPoint, SchedulerInfo};
use dashmap::DashMap;
use tracing::info;

/// Scheduler endpoints published per area.
#[derive(Default)]
pub struct AccessPointDirectory {
    areas: DashMap<String, AccessPoint>,
}

impl AccessPointDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scheduler to an area, replacing an existing entry with the same URL.
    pub fn add(&self, area_id: &str, url: &str, weight: u32, access_token: &str) -> Result<()> {
        if area_id.is_empty() || url.is_empty() {
            return Err(EdgeError::InvalidInput(
                "area id and scheduler url are required".to_string(),
            ));
        }

        let mut entry = self.areas.entry(area_id.to_string()).or_insert_with(|| AccessPoint {
            area_id: area_id.to_string(),
            schedulers: Vec::new(),
        });
        entry.schedulers.retain(|s| s.url != url);
        entry.schedulers.push(SchedulerInfo {
            url: url.to_string(),
            weight,
            online: true,
            access_token: access_token.to_string(),
        });

        info!(area = %area_id, url = %url, weight, "Access point added");
        Ok(())
    }

    /// Remove every scheduler of an area.
    pub fn remove(&self, area_id: &str) -> Result<AccessPoint> {
        let (_, removed) = self
            .areas
            .remove(area_id)
            .ok_or_else(|| EdgeError::InvalidInput(format!("unknown area {}", area_id)))?;
        info!(area = %area_id, "Access points removed");
        Ok(removed)
    }

    /// Areas with at least one access point, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut areas: Vec<String> = self.areas.iter().map(|e| e.key().clone()).collect();
        areas.sort();
        areas
    }

    /// Full entry of an area, including access tokens.
    pub fn show(&self, area_id: &str) -> Option<AccessPoint> {
        self.areas.get(area_id).map(|e| e.clone())
    }

    /// Scheduler URLs of an area, highest weight first.
    pub fn get(&self, area_id: &str) -> Vec<String> {
        let Some(entry) = self.areas.get(area_id) else {
            return Vec::new();
        };
        let mut schedulers: Vec<&SchedulerInfo> =
            entry.schedulers.iter().filter(|s| s.online).collect();
        schedulers.sort_by(|a, b| b.weight.cmp(&a.weight));
        schedulers.into_iter().map(|s| s.url.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_show_remove() {
        let dir = AccessPointDirectory::new();
        dir.add("asia-china", "https://s1", 10, "t1").unwrap();
        dir.add("asia-china", "https://s2", 20, "t2").unwrap();
        dir.add("asia-china", "https://s1", 5, "t3").unwrap();
        dir.add("europe", "https://s3", 1, "t4").unwrap();

        assert_eq!(dir.list(), vec!["asia-china".to_string(), "europe".to_string()]);
        let ap = dir.show("asia-china").unwrap();
        assert_eq!(ap.schedulers.len(), 2);
        assert_eq!(dir.get("asia-china"), vec!["https://s2".to_string(), "https://s1".to_string()]);

        dir.remove("asia-china").unwrap();
        assert!(dir.show("asia-china").is_none());
        assert!(dir.get("asia-china").is_empty());
        assert!(dir.remove("asia-china").is_err());
    }

    #[test]
    fn test_add_requires_fields() {
        let dir = AccessPointDirectory::new();
        assert!(dir.add("", "https://s1", 1, "t").is_err());
        assert!(dir.add("asia", "", 1, "t").is_err());
    }
}
