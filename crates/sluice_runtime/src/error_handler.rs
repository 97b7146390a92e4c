//! Turning resolver failures into error entries.

use crate::error::FieldError;
use crate::path::ResultPath;
use crate::resolver::{ResolverError, ResolverInfo};

/// A failed resolver call.
#[derive(Debug, Clone, Copy)]
pub struct ResolverErrorParams<'a> {
    pub error: &'a ResolverError,
    pub path: &'a ResultPath,
    pub info: &'a ResolverInfo,
}

/// Decides which errors a failed resolver call reports.
pub trait ResolverErrorHandler: Send + Sync {
    fn handle(&self, params: ResolverErrorParams<'_>) -> Vec<FieldError>;
}

impl<H: ResolverErrorHandler + ?Sized> ResolverErrorHandler for Box<H> {
    fn handle(&self, params: ResolverErrorParams<'_>) -> Vec<FieldError> {
        (**self).handle(params)
    }
}

/// Reports one error at the field's path, coded after the failure kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleResolverErrorHandler;

impl ResolverErrorHandler for SimpleResolverErrorHandler {
    fn handle(&self, params: ResolverErrorParams<'_>) -> Vec<FieldError> {
        tracing::warn!(
            path = %params.path,
            parent_type = %params.info.parent_type,
            field = %params.info.field_name,
            error = %params.error,
            "resolver failed"
        );
        vec![FieldError::from(params.error.clone()).with_path(params.path.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RESOLVER_ERROR;

    #[test]
    fn test_simple_handler_reports_one_error_at_path() {
        let error = ResolverError::Custom("upstream down".to_string());
        let path = ResultPath::root().segment("count");
        let info = ResolverInfo::new("count", "Subscription").with_path(path.clone());

        let errors = SimpleResolverErrorHandler.handle(ResolverErrorParams {
            error: &error,
            path: &path,
            info: &info,
        });

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path.as_ref(), Some(&path));
        assert_eq!(errors[0].code(), Some(RESOLVER_ERROR));
    }
}
