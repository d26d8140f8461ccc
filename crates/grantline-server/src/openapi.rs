use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Grantline API",
        version = "0.1.0",
        description = "Ingestion pipeline for public grant announcements."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::create_source,
        crate::routes::run_all_sources,
        crate::routes::run_source,
        crate::routes::enqueue_source,
        crate::routes::source_logs,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeRequest,
        crate::dto::ScrapeResponse,
        crate::dto::PageResponse,
        crate::dto::GrantResponse,
        crate::dto::CreateSourceRequest,
        crate::dto::SourceResponse,
        crate::dto::RunSourceResponse,
        crate::dto::RunAllResponse,
        crate::dto::EnqueueResponse,
        crate::dto::LogResponse,
        crate::dto::LogListResponse,
        crate::dto::JobResultResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "Ad-hoc crawling"),
        (name = "sources", description = "Source registry, runs and audit logs"),
        (name = "jobs", description = "Background scrape jobs"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI spec.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "API key. Set via GRANTLINE_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        for expected in [
            "/v1/scrape",
            "/v1/sources",
            "/v1/sources/run",
            "/v1/sources/{id}/run",
            "/v1/sources/{id}/enqueue",
            "/v1/sources/{id}/logs",
            "/v1/jobs",
            "/v1/jobs/{id}",
            "/health",
        ] {
            assert!(
                paths.iter().any(|p| p.as_str() == expected),
                "missing path {expected}"
            );
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
