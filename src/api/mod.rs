pub mod attendance;
pub mod occupancy;
pub mod review;

#[cfg(test)]
pub(crate) mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use actix_web::{test::TestRequest, web};

    use crate::attendance::AttendanceService;
    use crate::store::memory::InMemoryStore;
    use crate::test_support::helpers::test_service;

    /// Full app with the production routes, rate limiters included.
    macro_rules! test_app {
        ($data:expr) => {
            actix_web::test::init_service(
                actix_web::App::new()
                    .app_data($data.clone())
                    .configure(|cfg| {
                        crate::routes::configure(cfg, crate::config::Config::default())
                    }),
            )
            .await
        };
    }
    pub(crate) use test_app;

    pub fn test_data(pairs: &[(&str, &str)]) -> (web::Data<AttendanceService>, Arc<InMemoryStore>) {
        let (service, store) = test_service(pairs);
        (web::Data::new(service), store)
    }

    fn reader() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], 5000))
    }

    /// The limiter keys on the peer address, so every request needs one.
    pub fn get(uri: &str) -> TestRequest {
        TestRequest::get().uri(uri).peer_addr(reader())
    }

    pub fn post(uri: &str) -> TestRequest {
        TestRequest::post().uri(uri).peer_addr(reader())
    }
}
