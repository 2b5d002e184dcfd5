//! End-to-end tests: a system provides services and a client consumes them
//! over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use arkalix_core::{
    Fault, FaultKind, Future, RuntimeScheduler, Scheduler, SchedulerConfig, SchedulerExt,
};
use arkalix_server::network::CLIENT_RESPONSE_FAULT;
use arkalix_server::{
    AccessPolicy, ClientConnection, ClientRequest, Encoding, Service, ServiceDescription,
    ServiceRequest, ServiceResponse, System,
};
use http::StatusCode;
use tokio::runtime::Handle;

fn scheduler() -> Arc<dyn Scheduler> {
    Arc::new(RuntimeScheduler::from_handle(Handle::current()))
}

fn system(scheduler: &Arc<dyn Scheduler>) -> System {
    System::builder()
        .name("loopback")
        .insecure()
        .local_addr(([127, 0, 0, 1], 0).into())
        .scheduler(Arc::clone(scheduler))
        .shutdown_grace(Duration::from_millis(500))
        .build()
        .unwrap()
}

fn describe(name: &str, base_path: &str) -> ServiceDescription {
    ServiceDescription::new(name, base_path, vec![Encoding::JSON], AccessPolicy::Unrestricted)
        .unwrap()
}

/// Answers with the request body in upper case.
fn upper() -> Service {
    Service::new(describe("upper", "/upper"), |request: ServiceRequest| {
        let text = request.body_text().unwrap_or_default().to_uppercase();
        let mut response = ServiceResponse::new();
        response.body_text(text);
        Future::success(response)
    })
}

/// Waits the number of milliseconds given in the body, then echoes it.
fn delay() -> Service {
    Service::new(describe("delay", "/delay"), |request: ServiceRequest| {
        let body = request.body().clone();
        let millis: u64 = request.body_text().ok().and_then(|t| t.parse().ok()).unwrap_or(0);
        request
            .scheduler()
            .schedule(Duration::from_millis(millis), move || {
                let mut response = ServiceResponse::new();
                response.body_encoded(Encoding::JSON, body);
                Ok(response)
            })
    })
}

fn failing() -> Service {
    Service::new(describe("failing", "/failing"), |_request: ServiceRequest| {
        Future::failure(Fault::msg("sensor offline"))
    })
}

async fn connect(system: &System) -> ClientConnection {
    system
        .connect(system.local_addr())
        .into_async()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_reaches_provided_service() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(upper()).into_async().await.unwrap();

    let client = connect(&system).await;
    assert!(client.is_live());
    assert_eq!(client.remote_addr(), system.local_addr());

    let response = client
        .send(ClientRequest::new("/upper").body("celsius"))
        .map_result(|outcome| outcome.and_then(arkalix_server::ClientResponse::ensure_success))
        .into_async()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body_text().unwrap(), "CELSIUS");
    assert!(response.encoding().is_none());

    client.close().into_async().await.unwrap();
    system.shutdown().into_async().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipelined_responses_arrive_in_request_order() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(delay()).into_async().await.unwrap();
    let client = connect(&system).await;

    // Later requests finish first on the server.
    let pending: Vec<_> = [150, 75, 0]
        .into_iter()
        .map(|millis: u64| client.send(ClientRequest::new("/delay").body(millis.to_string())))
        .collect();

    let mut bodies = Vec::new();
    for response in pending {
        let response = response.into_async().await.unwrap();
        assert_eq!(response.encoding(), Some(&Encoding::JSON));
        bodies.push(response.body_text().unwrap().to_string());
    }
    assert_eq!(bodies, ["150", "75", "0"]);

    system.shutdown().into_async().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_path_is_404_and_handler_failure_is_500() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(failing()).into_async().await.unwrap();
    let client = connect(&system).await;

    let missing = client
        .send(ClientRequest::new("/missing"))
        .into_async()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let fault = missing.ensure_success().unwrap_err();
    assert_eq!(fault.kind(), FaultKind::Custom(CLIENT_RESPONSE_FAULT));

    let failed = client
        .send(ClientRequest::new("/failing"))
        .into_async()
        .await
        .unwrap();
    assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The connection survives both.
    assert!(client.is_live());
    system.shutdown().into_async().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dismissed_service_is_no_longer_routed() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    let handle = system.provide(upper()).into_async().await.unwrap();
    let client = connect(&system).await;

    let before = client.send(ClientRequest::new("/upper")).into_async().await.unwrap();
    assert_eq!(before.status(), StatusCode::OK);

    assert!(handle.dismiss());
    assert!(system.provided_services().is_empty());
    let after = client.send(ClientRequest::new("/upper")).into_async().await.unwrap();
    assert_eq!(after.status(), StatusCode::NOT_FOUND);

    system.shutdown().into_async().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_and_close_delivers_last_response() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(upper()).into_async().await.unwrap();
    let client = connect(&system).await;

    let response = client
        .send_and_close(ClientRequest::new("/upper").body("bye"))
        .into_async()
        .await
        .unwrap();
    assert_eq!(response.body_text().unwrap(), "BYE");
    assert!(!client.is_live());
    client.close().into_async().await.unwrap();

    let late = client.send(ClientRequest::new("/upper")).into_async().await;
    assert!(late.is_err());

    system.shutdown().into_async().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn system_shutdown_answers_outstanding_requests() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(delay()).into_async().await.unwrap();
    let client = connect(&system).await;

    let response = client.send(ClientRequest::new("/delay").body("100"));
    // Give the request time to reach the server before it closes.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let shutdown = system.shutdown();

    let response = response.into_async().await.unwrap();
    assert_eq!(response.body_text().unwrap(), "100");
    shutdown.into_async().await.unwrap();

    assert!(system.is_shutting_down());
    assert!(matches!(
        system.provide(upper()).into_async().await,
        Err(Fault::ShuttingDown)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_shutdown_stops_system() {
    let scheduler = scheduler();
    let system = system(&scheduler);
    system.provide(upper()).into_async().await.unwrap();
    let addr = system.local_addr();

    scheduler
        .shutdown(Duration::from_millis(500))
        .into_async()
        .await
        .unwrap();
    assert!(system.is_shutting_down());

    // The closed server no longer answers, even for a client on a running
    // scheduler.
    let other = request_on_fresh_scheduler(addr).await;
    assert!(other.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn owned_scheduler_shutdown_answers_outstanding_requests() {
    let owned: Arc<dyn Scheduler> = Arc::new(
        RuntimeScheduler::new(&SchedulerConfig {
            worker_threads: Some(2),
            ..SchedulerConfig::default()
        })
        .unwrap(),
    );
    let system = system(&owned);
    system.provide(delay()).into_async().await.unwrap();
    let client = connect(&system).await;

    let response = client.send(ClientRequest::new("/delay").body("300"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    let termination = owned.shutdown(Duration::from_secs(2));
    assert!(system.is_shutting_down());

    let response = response.into_async().await.unwrap();
    assert_eq!(response.body_text().unwrap(), "300");
    termination.into_async().await.unwrap();
    assert!(!client.is_live());
}

async fn request_on_fresh_scheduler(addr: std::net::SocketAddr) -> Result<(), Fault> {
    let fresh = RuntimeScheduler::from_handle(Handle::current());
    let client = ClientConnection::connect(&fresh, addr, Default::default())
        .into_async()
        .await?;
    // The server is closed: the request fails or the connection drops.
    client
        .send(ClientRequest::new("/upper"))
        .into_async()
        .await
        .map(drop)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_on_shared_scheduler_still_works_between_systems() {
    let scheduler = scheduler();
    let first = system(&scheduler);
    first.provide(upper()).into_async().await.unwrap();
    first.shutdown().into_async().await.unwrap();

    let value = scheduler.execute(|| Ok(21 * 2)).into_async().await.unwrap();
    assert_eq!(value, 42);

    let second = system(&scheduler);
    second.provide(upper()).into_async().await.unwrap();
    let client = connect(&second).await;
    let response = client
        .send(ClientRequest::new("/upper").body("again"))
        .into_async()
        .await
        .unwrap();
    assert_eq!(response.body_text().unwrap(), "AGAIN");
    second.shutdown().into_async().await.unwrap();
}
