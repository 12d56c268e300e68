use super::handlers::{self, health, login, me, register};
use crate::store::{Device, DeviceType};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::test_route::test_route,
        health::health,
        register::register_page,
        register::register,
        login::login,
        handlers::logout::logout,
        me::profile,
        me::devices,
        me::trust_device,
        me::bind_yubikey,
        me::change_password,
    ),
    components(schemas(
        handlers::Message,
        health::Health,
        register::UserRegister,
        login::UserLogin,
        login::LoginResponse,
        me::Profile,
        me::BindYubikey,
        me::ChangePassword,
        Device,
        DeviceType,
    )),
    tags(
        (name = "guestbook", description = "Guestbook backend"),
        (name = "health", description = "Liveness and dependency status"),
        (name = "register", description = "Account registration"),
        (name = "auth", description = "Login, logout and sessions"),
        (name = "me", description = "Signed-in user: profile, devices, YubiKey, password"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
