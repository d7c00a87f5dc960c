use leadflow_core::OwnerId;

/// Owner context for a request.
///
/// Resolved upstream and forwarded in the `x-owner-id` header; present on
/// every owner-scoped route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }
}
