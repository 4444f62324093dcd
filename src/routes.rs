use crate::{
    api::{attendance, employee, task},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::AppError,
    realtime::session,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Result, anyhow};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

/// Per-peer-IP limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    login: Limiter,
    register: Limiter,
    protected: Limiter,
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter(config.rate_login_per_min)?,
            register: build_limiter(config.rate_register_per_min)?,
            protected: build_limiter(config.rate_protected_per_min)?,
        })
    }
}

fn build_limiter(requests_per_min: u32) -> Result<Limiter> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / burst as u64).max(1);

    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit: {requests_per_min} per minute"))?;

    Ok(Arc::new(Governor::new(&cfg)))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    let prefix = config.api_prefix.as_str();

    // malformed bodies and query strings get the same envelope as other 400s
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    );

    // Real-time attendance channel
    cfg.route("/ws/attendance", web::get().to(session::attendance_ws));

    // Public routes
    cfg.service(
        web::scope(&format!("{prefix}/auth"))
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(limiters.register.clone())
                    .route(web::post().to(handlers::register)),
            ),
    );

    cfg.service(
        web::scope(&format!("{prefix}/public")).service(
            web::resource("/employees").route(web::get().to(employee::list_public_employees)),
        ),
    );

    // Protected routes
    cfg.service(
        web::scope(prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limiters.protected.clone()) // rate limiting
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::put().to(employee::update_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    )
                    // /employees/{id}/permanent
                    .service(
                        web::resource("/{id}/permanent")
                            .route(web::delete().to(employee::hard_delete_employee)),
                    ),
            )
            .service(
                web::scope("/tasks")
                    // /tasks
                    .service(
                        web::resource("")
                            .route(web::post().to(task::create_task))
                            .route(web::get().to(task::list_tasks)),
                    )
                    // /tasks/employee/{employee_id}
                    .service(
                        web::resource("/employee/{employee_id}")
                            .route(web::get().to(task::list_tasks_by_employee)),
                    )
                    // /tasks/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(task::get_task))
                            .route(web::put().to(task::update_task))
                            .route(web::delete().to(task::delete_task)),
                    )
                    // /tasks/{id}/permanent
                    .service(
                        web::resource("/{id}/permanent")
                            .route(web::delete().to(task::hard_delete_task)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("/punch-in").route(web::post().to(attendance::punch_in)))
                    .service(
                        web::resource("/punch-out").route(web::post().to(attendance::punch_out)),
                    )
                    .service(web::resource("/events").route(web::get().to(attendance::catch_up)))
                    .service(web::resource("/room").route(web::get().to(attendance::room_status))),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_clamped_instead_of_rejected() {
        assert!(build_limiter(0).is_ok());
    }

    #[test]
    fn rates_above_one_per_millisecond_still_build() {
        assert!(build_limiter(120_000).is_ok());
    }
}
