use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "langscout API",
        version = "0.1.0",
        description = "Domain crawl scheduler that classifies site languages through a proxy pool."
    ),
    paths(
        crate::routes::submit,
        crate::routes::get_batch,
        crate::routes::list_domains,
        crate::routes::get_domain,
        crate::routes::delete_domain,
        crate::routes::list_proxies,
        crate::routes::add_proxies,
        crate::routes::delete_proxy,
        crate::routes::echo,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SubmitBatchRequest,
        crate::dto::SubmitBatchResponse,
        crate::dto::BatchResultResponse,
        crate::dto::BatchPendingResponse,
        crate::dto::DomainResponse,
        crate::dto::DomainListResponse,
        crate::dto::ProxyInput,
        crate::dto::AddProxiesRequest,
        crate::dto::AddProxiesResponse,
        crate::dto::ProxyResponse,
        crate::dto::ProxyListResponse,
        crate::dto::PoolStatsResponse,
        crate::dto::HealthResponse,
        crate::dto::EchoResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "batches", description = "Priority crawl batches"),
        (name = "domains", description = "Crawl targets and their verdicts"),
        (name = "proxies", description = "Proxy registry"),
        (name = "system", description = "Health and callback sink"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds Bearer token security scheme to the OpenAPI document.
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
                            "API key. Set via LANGSCOUT_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
