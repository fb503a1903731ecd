use axum::handler::Handler;
use axum::routing::{self, MethodRouter};
use axum::Router;

/// Routes for one owned resource, rooted wherever it is nested.
///
/// ```ignore
/// ResourceRouter::new()
///     .list(list_campaigns)
///     .create(create_campaign)
///     .delete(delete_campaign)
///     .member("/jobs", get(campaign_jobs))
///     .into_router()
/// ```
pub struct ResourceRouter<S> {
    router: Router<S>,
}

impl<S> Default for ResourceRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ResourceRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        ResourceRouter {
            router: Router::new(),
        }
    }

    /// `GET /`
    pub fn list<H, T>(mut self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.router = self.router.route("/", routing::get(handler));
        self
    }

    /// `POST /`
    pub fn create<H, T>(mut self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.router = self.router.route("/", routing::post(handler));
        self
    }

    /// `DELETE /:id`
    pub fn delete<H, T>(mut self, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.router = self.router.route("/:id", routing::delete(handler));
        self
    }

    /// A sub-path of one member, e.g. `/:id/jobs`.
    pub fn member(mut self, path: &str, method_router: MethodRouter<S>) -> Self {
        self.router = self.router.route(&format!("/:id{path}"), method_router);
        self
    }

    pub fn into_router(self) -> Router<S> {
        self.router
    }
}
