use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::server::descriptor::{MethodDescriptor, Service};

/// Registered methods keyed by canonical method path (`/pkg.Service/Method`).
pub type PathMap = HashMap<String, Arc<MethodDescriptor>, ahash::RandomState>;

/// Maps full method paths to their descriptors.
///
/// Populated during setup; looked up once per incoming call.
#[derive(Debug, Default)]
pub struct Router {
    methods: PathMap,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every method a service describes.
    ///
    /// Paths are stored in canonical form, so `pkg.Svc/Echo` and
    /// `/pkg.Svc/Echo` name the same method. Paths that were already
    /// registered, or that the service lists more than once, are overridden
    /// by the later descriptor and reported in a single warning. Returns the
    /// cumulative map of registered methods.
    ///
    /// Fails without registering anything if any descriptor path is malformed.
    pub fn register<S>(&mut self, service: &S) -> Result<&PathMap, ServerError>
    where
        S: Service + ?Sized,
    {
        let descriptors = service
            .method_descriptors()
            .into_iter()
            .map(MethodDescriptor::canonicalize)
            .collect::<Result<Vec<_>, _>>()?;

        let overridden = self.merge(descriptors);
        if !overridden.is_empty() {
            warn!(
                paths = ?overridden,
                "Overriding previously registered RPC methods"
            );
        }

        Ok(&self.methods)
    }

    /// Insert canonicalized descriptors, returning the sorted paths that
    /// replaced an earlier entry.
    fn merge(&mut self, descriptors: Vec<MethodDescriptor>) -> Vec<String> {
        let mut overridden = Vec::new();

        for descriptor in descriptors {
            let key = descriptor.path().to_owned();
            info!(
                method = %key,
                call_type = %descriptor.call_type(),
                "Registered RPC method"
            );
            if self
                .methods
                .insert(key.clone(), Arc::new(descriptor))
                .is_some()
            {
                overridden.push(key);
            }
        }

        overridden.sort();
        overridden.dedup();
        overridden
    }

    /// Look up the descriptor registered for `path`.
    ///
    /// A path missing its leading slash is matched against the canonical key.
    pub fn lookup(&self, path: &str) -> Option<Arc<MethodDescriptor>> {
        match self.methods.get(path) {
            Some(descriptor) => Some(Arc::clone(descriptor)),
            None if !path.starts_with('/') => self.methods.get(&format!("/{path}")).cloned(),
            None => None,
        }
    }

    /// Check if a method is registered for the given path.
    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn methods(&self) -> &PathMap {
        &self.methods
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::descriptor::CallType;
    use std::io;
    use std::sync::Mutex;
    use tracing::Level;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(string, tag = "1")]
        text: String,
    }

    fn unary(path: &str) -> MethodDescriptor {
        MethodDescriptor::unary(path, |req: Ping, _ctx| async move { Ok(req) })
    }

    fn server_streaming(path: &str) -> MethodDescriptor {
        MethodDescriptor::server_streaming(path, |_req: Ping, writer, _ctx| async move {
            writer.finish()?;
            Ok(())
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut router = Router::new();
        let map = router
            .register(&vec![unary("/pkg.Svc/Echo"), server_streaming("/pkg.Svc/Watch")])
            .unwrap();
        assert_eq!(map.len(), 2);

        let echo = router.lookup("/pkg.Svc/Echo").unwrap();
        assert_eq!(echo.call_type(), CallType::Unary);
        assert!(router.lookup("/pkg.Svc/Missing").is_none());
        assert_eq!(router.paths(), vec!["/pkg.Svc/Echo", "/pkg.Svc/Watch"]);
    }

    #[test]
    fn test_register_returns_cumulative_map() {
        let mut router = Router::new();
        router.register(&unary("/pkg.Svc/Echo")).unwrap();
        let map = router.register(&unary("/pkg.Other/Echo")).unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains_key("/pkg.Svc/Echo"));
        assert!(map.contains_key("/pkg.Other/Echo"));
    }

    #[test]
    fn test_reregistration_overrides_and_reports() {
        let mut router = Router::new();
        assert!(router.merge(vec![unary("/pkg.Svc/Echo")]).is_empty());

        let overridden = router.merge(vec![
            server_streaming("/pkg.Svc/Echo"),
            unary("/pkg.Svc/Fresh"),
        ]);

        assert_eq!(overridden, vec!["/pkg.Svc/Echo".to_string()]);
        assert_eq!(router.len(), 2);
        assert_eq!(
            router.lookup("/pkg.Svc/Echo").unwrap().call_type(),
            CallType::ServerStreaming
        );
    }

    #[test]
    fn test_paths_are_stored_canonically() {
        let mut router = Router::new();
        router.register(&unary("pkg.Svc/Echo")).unwrap();
        assert!(router.contains("/pkg.Svc/Echo"));
        assert!(router.contains("pkg.Svc/Echo"));
        assert_eq!(router.lookup("/pkg.Svc/Echo").unwrap().path(), "/pkg.Svc/Echo");

        let map = router.register(&server_streaming("/pkg.Svc/Echo")).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(
            router.lookup("/pkg.Svc/Echo").unwrap().call_type(),
            CallType::ServerStreaming
        );
    }

    #[test]
    fn test_packageless_service_registers() {
        let mut router = Router::new();
        router.register(&unary("/Greeter/SayHello")).unwrap();
        assert!(router.lookup("/Greeter/SayHello").is_some());
    }

    #[test]
    fn test_duplicate_within_service_is_reported() {
        let mut router = Router::new();
        let overridden = router.merge(vec![
            unary("/pkg.Svc/Echo"),
            server_streaming("/pkg.Svc/Echo"),
        ]);

        assert_eq!(overridden, vec!["/pkg.Svc/Echo".to_string()]);
        assert_eq!(router.len(), 1);
        assert_eq!(
            router.lookup("/pkg.Svc/Echo").unwrap().call_type(),
            CallType::ServerStreaming
        );
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reregistration_emits_one_warning_naming_every_path() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(Level::WARN)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut router = Router::new();
            router
                .register(&vec![unary("/pkg.Svc/Echo"), unary("/pkg.Svc/Other")])
                .unwrap();
            router
                .register(&vec![
                    server_streaming("/pkg.Svc/Echo"),
                    unary("pkg.Svc/Other"),
                    unary("/pkg.Svc/Fresh"),
                ])
                .unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let warnings: Vec<&str> = output.lines().filter(|line| line.contains("WARN")).collect();

        assert_eq!(warnings.len(), 1, "{output}");
        assert!(warnings[0].contains("/pkg.Svc/Echo"));
        assert!(warnings[0].contains("/pkg.Svc/Other"));
        assert!(!warnings[0].contains("/pkg.Svc/Fresh"));
    }

    #[test]
    fn test_malformed_path_rejected_before_merge() {
        let mut router = Router::new();
        let result = router.register(&vec![unary("/pkg.Svc/Echo"), unary("no-slash")]);

        assert!(matches!(result, Err(ServerError::Path(_))));
        assert!(router.is_empty());
    }
}
