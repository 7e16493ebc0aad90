//! End-to-end dispatch scenarios over the mock transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use gale_http::testing::{MockApp, MockRequest, MockResponse, MockTransport};
use gale_http::{
    Deferred, HandlerOutcome, HttpContext, HttpError, Payload, ReplyHeaders, Route, RouteMethod,
    Server, ServerOptions,
};

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn serve(routes: Vec<Route<MockTransport>>) -> (Server<MockTransport>, MockApp) {
    let app = MockApp::new();
    let server = Server::new(ServerOptions {
        routes,
        ..ServerOptions::default()
    });
    server.listen(app.clone()).expect("valid configuration");
    (server, app)
}

/// A route that parses the body as JSON and echoes it back.
fn json_sink_route(method: RouteMethod, path: &str) -> Route<MockTransport> {
    Route::new(method, path, |ctx| {
        let (deferred, settle) = Deferred::pair();
        ctx.json().on_settle(move |outcome| match outcome {
            Ok(value) => settle.resolve(Payload::Json(value)),
            Err(error) => settle.reject(error),
        });
        Ok(HandlerOutcome::Deferred(deferred))
    })
}

#[test]
fn router_returns_json_document() {
    let app = MockApp::new();
    let server = Server::new(ServerOptions::<MockTransport> {
        router: Some(Rc::new(|_ctx| {
            Ok(HandlerOutcome::Sync(Payload::Json(
                serde_json::json!({"ok": true}),
            )))
        })),
        ..ServerOptions::default()
    });
    server.listen(app.clone()).expect("valid configuration");

    let res = app.simulate(MockRequest::new("GET", "/base"));
    assert_eq!(res.status().as_deref(), Some("200 OK"));
    assert_eq!(
        res.header("content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(res.body_str(), r#"{"ok":true}"#);
    assert!(res.is_ended());
}

#[test]
fn post_with_known_length_body_creates_resource() {
    let routes = vec![Route::new(RouteMethod::Post, "/users", |ctx| {
        let (deferred, settle) = Deferred::pair();
        let target = ctx.handle();
        ctx.json().on_settle(move |outcome| match outcome {
            Ok(value) => {
                let name = value
                    .get("name")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                target.status(201);
                settle.resolve(Payload::Json(serde_json::json!({
                    "id": "x",
                    "name": name,
                })));
            }
            Err(error) => settle.reject(error),
        });
        Ok(HandlerOutcome::Deferred(deferred))
    })];
    let (server, app) = serve(routes);

    let res = MockResponse::new();
    let req = MockRequest::new("POST", "/users").header("content-length", "14");
    app.simulate_on(req, res.clone());
    res.deliver_data(br#"{"name":"Ada"}"#, true);

    assert_eq!(res.status().as_deref(), Some("201 Created"));
    assert_eq!(
        res.header("content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(res.body_str(), r#"{"id":"x","name":"Ada"}"#);
    assert_eq!(server.metrics().active_http, 0);
    assert_eq!(server.metrics().pooled_http, 1);
}

#[test]
fn oversized_body_yields_413() {
    let routes = vec![json_sink_route(RouteMethod::Post, "/big")];
    let (_server, app) = serve(routes);

    let res = MockResponse::new();
    let req = MockRequest::new("POST", "/big")
        .header("content-length", &(MAX_BODY_BYTES + 1).to_string());
    app.simulate_on(req, res.clone());

    assert_eq!(res.status().as_deref(), Some("413 Payload Too Large"));
    assert_eq!(
        res.header("content-type").as_deref(),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(res.body_str(), "Request body too large");
}

#[test]
fn unknown_length_body_over_limit_yields_413() {
    let routes = vec![json_sink_route(RouteMethod::Post, "/big")];
    let (_server, app) = serve(routes);

    let res = MockResponse::new();
    app.simulate_on(MockRequest::new("POST", "/big"), res.clone());
    let chunk = vec![b'x'; MAX_BODY_BYTES];
    res.deliver_data(&chunk, false);
    res.deliver_data(b"x", true);

    assert_eq!(res.status().as_deref(), Some("413 Payload Too Large"));
    assert_eq!(res.body_str(), "Request body too large");
}

#[test]
fn malformed_json_yields_400() {
    let routes = vec![json_sink_route(RouteMethod::Post, "/badjson")];
    let (_server, app) = serve(routes);

    let res = MockResponse::new();
    app.simulate_on(MockRequest::new("POST", "/badjson"), res.clone());
    res.deliver_data(b"{invalid json}", true);

    assert_eq!(res.status().as_deref(), Some("400 Bad Request"));
    assert_eq!(
        res.header("content-type").as_deref(),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(res.body_str(), "Invalid JSON");
}

#[test]
fn slow_request_survives_drain_and_gates_shutdown() {
    let slow_settle: Rc<RefCell<Option<gale_http::Settle<Payload, HttpError>>>> =
        Rc::new(RefCell::new(None));
    let slot = Rc::clone(&slow_settle);
    let routes = vec![
        Route::new(RouteMethod::Get, "/slow", move |_ctx| {
            let (deferred, settle) = Deferred::pair();
            slot.borrow_mut().replace(settle);
            Ok(HandlerOutcome::Deferred(deferred))
        }),
        Route::new(RouteMethod::Get, "/ping", |_ctx| {
            Ok(HandlerOutcome::Sync(Payload::from("pong")))
        }),
    ];
    let (server, app) = serve(routes);

    let slow_res = MockResponse::new();
    app.simulate_on(MockRequest::new("GET", "/slow"), slow_res.clone());
    assert_eq!(server.metrics().active_http, 1);

    let done = server.shutdown(15_000);
    assert!(!done.is_settled());

    // a request racing the drain is turned away
    let ping = app.simulate(MockRequest::new("GET", "/ping"));
    assert_eq!(ping.status().as_deref(), Some("503 Service Unavailable"));
    assert_eq!(ping.header("connection").as_deref(), Some("close"));

    // the in-flight request still completes
    slow_settle
        .borrow_mut()
        .take()
        .expect("slow settle stashed")
        .resolve(Payload::from("ok"));
    assert_eq!(slow_res.status().as_deref(), Some("200 OK"));
    assert_eq!(slow_res.body_str(), "ok");

    assert_eq!(done.settled(), Some(Ok(())));
    assert!(app.is_closed());
    assert!(app.listen_socket().expect("socket handed out").is_closed());
}

#[test]
fn grace_timer_forces_close_with_work_still_active() {
    let routes = vec![Route::new(RouteMethod::Get, "/stuck", |_ctx| {
        let (deferred, _settle) = Deferred::pair();
        // leak the settle: this request never completes
        std::mem::forget(_settle);
        Ok(HandlerOutcome::Deferred(deferred))
    })];
    let (server, app) = serve(routes);

    app.simulate(MockRequest::new("GET", "/stuck"));
    let done = server.shutdown(10_000);
    assert!(!done.is_settled());

    assert!(app.fire_timer(0));
    assert_eq!(done.settled(), Some(Ok(())));
    assert!(app.is_closed());
}

#[test]
fn streamed_chunks_arrive_in_order_under_backpressure() {
    let chunks: Vec<Vec<u8>> = (0..1000u32)
        .map(|i| format!("{i:04}").into_bytes())
        .collect();
    let expected: Vec<u8> = chunks.iter().flatten().copied().collect();

    fn pump(ctx: &HttpContext<MockTransport>, pending: Rc<RefCell<VecDeque<Vec<u8>>>>) {
        loop {
            let next = pending.borrow_mut().pop_front();
            match next {
                Some(chunk) => {
                    if !ctx.write(&chunk) {
                        let target = ctx.handle();
                        let pending = Rc::clone(&pending);
                        ctx.on_writable(move |_offset| pump(&target, pending));
                        return;
                    }
                }
                None => {
                    ctx.end(None);
                    return;
                }
            }
        }
    }

    let source = chunks.clone();
    let routes = vec![Route::new(RouteMethod::Get, "/feed", move |ctx| {
        ctx.start_streaming(200, &ReplyHeaders::Preset(gale_http::HeaderPreset::TextPlain));
        let pending = Rc::new(RefCell::new(
            source.iter().cloned().collect::<VecDeque<_>>(),
        ));
        pump(ctx, pending);
        Ok(HandlerOutcome::Sync(Payload::None))
    })];
    let (server, app) = serve(routes);

    let res = MockResponse::new().with_write_capacity(64);
    app.simulate_on(MockRequest::new("GET", "/feed"), res.clone());

    let mut guard = 0;
    while !res.is_ended() {
        res.drain_writable();
        guard += 1;
        assert!(guard < 10_000, "stream did not finish");
    }
    assert_eq!(res.body_bytes(), expected);
    assert_eq!(server.metrics().active_http, 0);
    assert_eq!(server.metrics().pooled_http, 1);
}

#[test]
fn handler_throw_maps_to_error_reply_and_hook() {
    let seen = Rc::new(Cell::new(0u32));
    let hook_seen = Rc::clone(&seen);
    let app = MockApp::new();
    let server = Server::new(ServerOptions::<MockTransport> {
        routes: vec![
            Route::new(RouteMethod::Get, "/teapot", |_ctx| {
                Err(HttpError::custom(418, "short and stout"))
            }),
            Route::new(RouteMethod::Get, "/weird", |_ctx| {
                Err(HttpError::custom(299, "nonsense status"))
            }),
        ],
        on_http_error: Some(Rc::new(move |_ctx, _error| {
            hook_seen.set(hook_seen.get() + 1);
        })),
        ..ServerOptions::default()
    });
    server.listen(app.clone()).expect("valid configuration");

    let res = app.simulate(MockRequest::new("GET", "/teapot"));
    assert_eq!(res.status().as_deref(), Some("418 I'm a Teapot"));
    assert_eq!(res.body_str(), "short and stout");

    let res = app.simulate(MockRequest::new("GET", "/weird"));
    assert_eq!(res.status().as_deref(), Some("500 Internal Server Error"));
    assert_eq!(res.body_str(), "Internal Server Error");

    assert_eq!(seen.get(), 2);
}

#[test]
fn abort_mid_request_writes_nothing_and_recycles_once() {
    let routes = vec![json_sink_route(RouteMethod::Post, "/upload")];
    let (server, app) = serve(routes);

    let res = MockResponse::new();
    let req = MockRequest::new("POST", "/upload").header("content-length", "64");
    app.simulate_on(req, res.clone());
    res.deliver_data(b"partial", false);
    res.trigger_abort();

    assert!(res.status().is_none());
    assert!(res.body_bytes().is_empty());
    let metrics = server.metrics();
    assert_eq!(metrics.active_http, 0);
    assert_eq!(metrics.pooled_http, 1);

    // a late chunk after the abort changes nothing
    res.deliver_data(b"more", true);
    assert_eq!(server.metrics().pooled_http, 1);
}

#[test]
fn contexts_are_recycled_across_requests() {
    let seen_ctx: Rc<RefCell<Vec<*const HttpContext<MockTransport>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let track = Rc::clone(&seen_ctx);
    let routes = vec![Route::new(RouteMethod::Get, "/ok", move |ctx| {
        track.borrow_mut().push(ctx as *const HttpContext<MockTransport>);
        Ok(HandlerOutcome::Sync(Payload::from("ok")))
    })];
    let (server, app) = serve(routes);

    app.simulate(MockRequest::new("GET", "/ok"));
    app.simulate(MockRequest::new("GET", "/ok"));

    let seen = seen_ctx.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1], "the same pooled context served both");
    assert_eq!(server.metrics().pooled_http, 1);
}

#[test]
fn route_params_and_queries_reach_the_handler() {
    let routes = vec![Route::new(RouteMethod::Get, "/users/:id/posts/:post", |ctx| {
        let id = ctx.param("id").unwrap_or_default();
        let post = ctx.param(1usize).unwrap_or_default();
        let sort = ctx.query("sort").unwrap_or_default();
        Ok(HandlerOutcome::Sync(Payload::from(format!(
            "{id}/{post}?{sort}"
        ))))
    })];
    let (_server, app) = serve(routes);

    let req = MockRequest::new("GET", "/users/42/posts/7").query_param("sort", "asc");
    let res = app.simulate(req);
    assert_eq!(res.body_str(), "42/7?asc");
}
