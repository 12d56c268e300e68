#[utoipa::path(
    get,
    path = "/test",
    responses(
        (status = 200, description = "Server is up", body = String, content_type = "text/plain")
    ),
    tag = "guestbook"
)]
pub async fn test_route() -> &'static str {
    "Test route is working!"
}
