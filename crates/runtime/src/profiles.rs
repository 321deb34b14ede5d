//! Profile and organization selection, relayed between the configuration
//! source and the webview.

use parking_lot::RwLock;
use protocol::{AvailableProfiles, ProfileDescription, SelectedOrg};

#[derive(Debug, Default)]
struct Selection {
    profiles: Vec<ProfileDescription>,
    selected_profile_id: Option<String>,
    selected_org_id: Option<String>,
}

/// Available profiles plus the current selection.
///
/// Every mutator returns the resulting [`AvailableProfiles`], ready to be
/// broadcast as `didChangeAvailableProfiles`. Profile contents are opaque.
#[derive(Debug, Default)]
pub struct ProfileState {
    inner: RwLock<Selection>,
}

impl ProfileState {
    pub fn new(profiles: Vec<ProfileDescription>, selected: Option<String>) -> Self {
        let selected_profile_id = selected.or_else(|| profiles.first().map(|p| p.id.clone()));
        Self {
            inner: RwLock::new(Selection {
                profiles,
                selected_profile_id,
                selected_org_id: None,
            }),
        }
    }

    pub fn current(&self) -> AvailableProfiles {
        let inner = self.inner.read();
        AvailableProfiles {
            profiles: inner.profiles.clone(),
            selected_profile_id: inner.selected_profile_id.clone(),
        }
    }

    pub fn selected_org(&self) -> Option<String> {
        self.inner.read().selected_org_id.clone()
    }

    pub fn select_profile(&self, id: Option<String>) -> AvailableProfiles {
        self.inner.write().selected_profile_id = id;
        self.current()
    }

    /// Switch organization. A present `profileId` (even `null`) also replaces
    /// the selected profile.
    pub fn select_org(&self, org: SelectedOrg) -> AvailableProfiles {
        {
            let mut inner = self.inner.write();
            inner.selected_org_id = org.id;
            if let Some(profile_id) = org.profile_id {
                inner.selected_profile_id = profile_id;
            }
        }
        self.current()
    }

    /// Replace the available profiles. A selection that no longer exists
    /// falls back to the first profile.
    pub fn replace(&self, profiles: Vec<ProfileDescription>) -> AvailableProfiles {
        {
            let mut inner = self.inner.write();
            let still_present = inner
                .selected_profile_id
                .as_ref()
                .is_some_and(|id| profiles.iter().any(|p| &p.id == id));
            if !still_present {
                inner.selected_profile_id = profiles.first().map(|p| p.id.clone());
            }
            inner.profiles = profiles;
        }
        self.current()
    }
}
