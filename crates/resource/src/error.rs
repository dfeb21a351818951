//! Resource manager errors (thiserror-based).

use thiserror::Error;

use vda_common::VdaError;

use crate::types::{ClientId, ResourceId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("empty resource request")]
    EmptyRequest,

    #[error("too many resources requested: {requested} (max {max})")]
    TooManyRequests { requested: usize, max: usize },

    #[error("{0} is not registered")]
    UnknownClient(ClientId),

    #[error("broker denied the request: {0}")]
    Denied(String),

    #[error("broker granted {granted} of {requested} resources")]
    UnderAllocated { requested: usize, granted: usize },

    #[error("{0} is not allocated")]
    UnknownResource(ResourceId),

    #[error("{id} is not owned by {client}")]
    NotOwner { id: ResourceId, client: ClientId },

    #[error("broker failure: {0}")]
    Broker(String),
}

impl From<ResourceError> for VdaError {
    fn from(err: ResourceError) -> Self {
        VdaError::ResourceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vda_common::ErrorKind;

    #[test]
    fn resource_errors_surface_as_resource_unavailable() {
        let err: VdaError = ResourceError::UnderAllocated {
            requested: 2,
            granted: 1,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);
        assert!(err.to_string().contains("1 of 2"));
    }
}
