/// Whether the view should stay pinned to the newest line.
///
/// Survives buffer growth; a new tracking session starts from a fresh
/// default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowState {
    pub is_following: bool,
    pub detached_by_user: bool,
}

impl Default for FollowState {
    fn default() -> Self {
        Self {
            is_following: true,
            detached_by_user: false,
        }
    }
}

impl FollowState {
    pub fn new(follow: bool) -> Self {
        if follow {
            Self::default()
        } else {
            Self {
                is_following: false,
                detached_by_user: false,
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The operator scrolled away from the tail or switched follow off.
    pub fn detach(&mut self) {
        self.is_following = false;
        self.detached_by_user = true;
    }

    pub fn reattach(&mut self) {
        self.is_following = true;
        self.detached_by_user = false;
    }

    pub fn set(&mut self, follow: bool) {
        if follow {
            self.reattach();
        } else {
            self.detach();
        }
    }

    pub fn should_follow_after_update(&self) -> bool {
        self.is_following && !self.detached_by_user
    }
}
