/// Gate checked before a conversation starts
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self) -> bool;
}

/// Authorization fixed at construction (from `access.premium`)
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthorizer {
    allowed: bool,
}

impl StaticAuthorizer {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_authorized(&self) -> bool {
        self.allowed
    }
}
