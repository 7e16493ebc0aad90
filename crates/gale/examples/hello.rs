//! Hello World Example - Minimal gale Application
//!
//! This example demonstrates the most basic gale setup:
//! - Creating a server with a couple of routes
//! - Shape-dispatched responses (text, JSON, errors)
//! - Driving the engine with the in-memory mock transport
//!
//! # Running This Example
//!
//! ```bash
//! cargo run --example hello
//! ```

use gale::http::testing::{MockApp, MockRequest, MockTransport};
use gale::{HandlerOutcome, HttpError, Payload, Route, RouteMethod, Server, ServerOptions};

fn check_eq<T: PartialEq + std::fmt::Debug>(left: T, right: T, message: &str) -> bool {
    if left == right {
        true
    } else {
        eprintln!("Check failed: {message}. left={left:?} right={right:?}");
        false
    }
}

fn main() {
    println!("gale Hello World Example");
    println!("========================\n");

    // Register three routes: plain text, JSON, and an error path.
    let server = Server::new(ServerOptions::<MockTransport> {
        port: 6000,
        routes: vec![
            Route::new(RouteMethod::Get, "/", |_ctx| {
                Ok(HandlerOutcome::Sync(Payload::from("Hello, World!")))
            }),
            Route::new(RouteMethod::Get, "/greet/:name", |ctx| {
                let name = ctx.param("name").unwrap_or_default();
                Ok(HandlerOutcome::Sync(Payload::Json(serde_json::json!({
                    "greeting": format!("Hello, {name}!"),
                }))))
            }),
            Route::new(RouteMethod::Get, "/teapot", |_ctx| {
                Err(HttpError::custom(418, "I refuse to brew coffee"))
            }),
        ],
        ..ServerOptions::default()
    });

    // The mock transport stands in for the socket layer.
    let app = MockApp::new();
    server.listen(app.clone()).expect("configuration is valid");
    println!("Listening on port {}\n", app.listen_port().expect("listening"));

    println!("Making request: GET /");
    let res = app.simulate(MockRequest::new("GET", "/"));
    println!("GET / -> {}", res.status().expect("status written"));
    println!("Response: {}\n", res.body_str());
    if !check_eq(res.body_str(), "Hello, World!".to_string(), "root body") {
        return;
    }

    println!("Making request: GET /greet/Ada");
    let res = app.simulate(MockRequest::new("GET", "/greet/Ada"));
    println!("GET /greet/Ada -> {}", res.status().expect("status written"));
    println!("Response: {}\n", res.body_str());
    if !check_eq(
        res.body_str(),
        r#"{"greeting":"Hello, Ada!"}"#.to_string(),
        "greeting body",
    ) {
        return;
    }

    println!("Making request: GET /teapot");
    let res = app.simulate(MockRequest::new("GET", "/teapot"));
    println!("GET /teapot -> {}", res.status().expect("status written"));
    println!("Response: {}\n", res.body_str());
    if !check_eq(
        res.status(),
        Some("418 I'm a Teapot".to_string()),
        "teapot status",
    ) {
        return;
    }

    // Drain: in-flight work is done, so shutdown resolves immediately.
    let done = server.shutdown(5_000);
    if !check_eq(done.is_settled(), true, "idle shutdown resolves") {
        return;
    }

    println!("All assertions passed!");
}
