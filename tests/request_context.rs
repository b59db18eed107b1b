//! Request-context identity, handler binding and popup inheritance,
//! exercised end to end against the running engine.

mod common;

use std::time::Duration;

use common::*;
use embedium::{Embedder, EmbedderConfig, Point, RequestContext};
use futures::StreamExt;

const OPENER_URL: &str = "http://tests-simple-rch1.com/nav1.html";
const SAME_ORIGIN_POPUP_URL: &str = "http://tests-simple-rch1.com/pop1.html";
const CROSS_ORIGIN_POPUP_URL: &str = "http://tests-simple-rch2.com/pop1.html";

#[tokio::test]
async fn browser_without_context_uses_the_global_context() {
    let harness = launch();
    harness.add_page("http://tests-global.com/nav1.html", "<html><body>Nav1</body></html>");

    let (client, mut events) = TestClient::channel();
    let browser = harness
        .embedder
        .create_browser("http://tests-global.com/nav1.html", None, client)
        .await
        .unwrap();

    let context = browser.request_context();
    assert!(context.is_global());
    assert!(context.is_same(&RequestContext::global()));
    assert!(context.handler().is_none());

    let (loaded, url, status) = expect_load_end(&mut events).await;
    assert_eq!(status, 200);
    assert_eq!(url.as_str(), "http://tests-global.com/nav1.html");
    assert!(loaded.request_context().is_same(&context));
}

#[tokio::test]
async fn browser_reports_its_creation_context_for_its_lifetime() {
    let harness = launch();
    harness.add_page("http://tests-lifetime.com/nav1.html", "<html><body>Nav1</body></html>");
    harness.add_page("http://tests-lifetime.com/nav2.html", "<html><body>Nav2</body></html>");

    let context = RequestContext::create(None);
    let (client, mut events) = TestClient::channel();
    let browser = harness
        .embedder
        .create_browser(
            "http://tests-lifetime.com/nav1.html",
            Some(context.clone()),
            client,
        )
        .await
        .unwrap();
    assert!(browser.request_context().is_same(&context));
    assert!(!browser.request_context().is_global());

    let (loaded, _, _) = expect_load_end(&mut events).await;
    assert!(loaded.request_context().is_same(&context));

    // context binding survives re-navigation
    browser.navigate("http://tests-lifetime.com/nav2.html").unwrap();
    let (loaded, url, _) = expect_load_end(&mut events).await;
    assert_eq!(url.as_str(), "http://tests-lifetime.com/nav2.html");
    assert!(loaded.request_context().is_same(&context));
    assert_eq!(loaded.url().await.unwrap().as_str(), "http://tests-lifetime.com/nav2.html");
}

#[tokio::test]
async fn missing_document_still_completes_the_load() {
    let harness = launch();
    let (client, mut events) = TestClient::channel();
    harness
        .embedder
        .create_browser("http://tests-missing.com/nope.html", None, client)
        .await
        .unwrap();

    let (_, url, status) = expect_load_end(&mut events).await;
    assert_eq!(url.as_str(), "http://tests-missing.com/nope.html");
    assert_eq!(status, 404);
}

// Port of the cookie flow: a context handler supplies its own cookie
// manager, the document's cookie write lands there, and the browser keeps
// reporting the context it was created with.
#[tokio::test]
async fn cookie_manager_is_supplied_by_the_context_handler() {
    let url = "http://tests-simple-rch.com/nav1.html";
    let harness = launch();
    harness.add_page(
        url,
        "<html>\
         <head><script>document.cookie='name1=value1';</script></head>\
         <body>Nav1</body>\
         </html>",
    );

    let manager = harness.embedder.create_cookie_manager();
    let (handler, state) = TrackingHandler::new(manager.clone(), url);
    let context = RequestContext::create(Some(handler.clone()));
    let (client, mut events) = TestClient::channel();

    harness
        .embedder
        .create_browser(url, Some(context.clone()), client)
        .await
        .unwrap();

    let (browser, load_url, status) = expect_load_end(&mut events).await;
    assert_eq!(load_url.as_str(), url);
    assert_eq!(status, 200);

    let reported = browser.request_context();
    assert!(reported.is_same(&context));
    assert!(!reported.is_global());
    let bound = reported.handler().expect("handler bound at creation");
    assert!(same_handler(&bound, &handler));

    // the supplier was observed before load end, once for this request
    assert_eq!(state.calls(), vec![url.to_string()]);

    // the script-set cookie is in the supplied manager
    let cookies = manager.all_cookies().await.unwrap();
    assert!(cookies
        .iter()
        .any(|c| c.name == "name1" && c.value == "value1" && c.domain == "tests-simple-rch.com"));

    handler.detach();
}

#[tokio::test]
async fn detached_handler_falls_back_to_the_default_store() {
    let url1 = "http://tests-detach.com/nav1.html";
    let url2 = "http://tests-detach.com/nav2.html";
    let harness = launch();
    harness.add_page(
        url1,
        "<html><head><script>document.cookie='name1=value1';</script></head><body></body></html>",
    );
    harness.add_page(
        url2,
        "<html><head><script>document.cookie='name2=value2';</script></head><body></body></html>",
    );

    let manager = harness.embedder.create_cookie_manager();
    let (handler, state) = TrackingHandler::new(manager.clone(), url1);
    let context = RequestContext::create(Some(handler.clone()));
    let (client, mut events) = TestClient::channel();

    let browser = harness
        .embedder
        .create_browser(url1, Some(context.clone()), client)
        .await
        .unwrap();
    expect_load_end(&mut events).await;

    // sever the back-reference before the owner goes away; later supplier
    // lookups must no-op into the default store
    handler.detach();

    browser.navigate(url2).unwrap();
    expect_load_end(&mut events).await;

    assert_eq!(state.calls(), vec![url1.to_string()]);
    let cookies = manager.all_cookies().await.unwrap();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "name1");
}

#[tokio::test]
async fn shutdown_destroys_remaining_sessions() {
    let harness = launch();
    harness.add_page("http://tests-shutdown.com/nav1.html", "<html><body></body></html>");

    let (client, mut events) = TestClient::channel();
    let browser = harness
        .embedder
        .create_browser("http://tests-shutdown.com/nav1.html", None, client)
        .await
        .unwrap();
    expect_load_end(&mut events).await;

    harness.embedder.shutdown().await.unwrap();
    let closed = expect_before_close(&mut events).await;
    assert_eq!(closed.id(), browser.id());

    // once the loop has wound down, handle operations report the stale engine
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        if browser.navigate("http://tests-shutdown.com/nav1.html").is_err() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "engine loop never terminated"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn unresponsive_network_role_times_out_the_navigation() {
    let config = EmbedderConfig::builder()
        .request_timeout(Duration::from_millis(200))
        .build();
    let (embedder, mut engine, network) = Embedder::launch(config);
    tokio::spawn(async move { while engine.next().await.is_some() {} });
    // the IO-role loop is never polled, so no request can resolve

    let (client, mut events) = TestClient::channel();
    embedder
        .create_browser("http://tests-timeout.com/nav1.html", None, client)
        .await
        .unwrap();

    let (_, url, status) = expect_load_end(&mut events).await;
    assert_eq!(url.as_str(), "http://tests-timeout.com/nav1.html");
    assert_eq!(status, 0);
    drop(network);
}

#[derive(Clone, Copy, PartialEq)]
enum PopupMode {
    WindowOpen,
    TargetedLink,
    NoReferrerLink,
}

/// Drive the two-page popup flow and assert context inheritance, supplier
/// attribution and the shared cookie manager, for one mode/origin pairing.
async fn run_popup_scenario(same_origin: bool, mode: PopupMode) {
    let popup_url = if same_origin {
        SAME_ORIGIN_POPUP_URL
    } else {
        CROSS_ORIGIN_POPUP_URL
    };

    let link = match mode {
        PopupMode::WindowOpen => String::new(),
        PopupMode::TargetedLink => {
            format!("<a href=\"{popup_url}\" target=\"mytarget\">CLICK ME</a>")
        }
        PopupMode::NoReferrerLink => {
            format!("<a href=\"{popup_url}\" rel=\"noreferrer\" target=\"_blank\">CLICK ME</a>")
        }
    };

    let harness = launch();
    harness.add_page(
        OPENER_URL,
        &format!(
            "<html>\
             <head><script>document.cookie='name1=value1';\
             function doPopup() {{ window.open('{popup_url}'); }}\
             </script></head>\
             <body><h1>{link}</h1></body>\
             </html>"
        ),
    );
    harness.add_page(
        popup_url,
        "<html>\
         <head><script>document.cookie='name2=value2';</script></head>\
         <body>Nav1</body>\
         </html>",
    );

    let manager = harness.embedder.create_cookie_manager();
    let (handler, state) = TrackingHandler::new(manager.clone(), OPENER_URL);
    let context = RequestContext::create(Some(handler.clone()));
    let (client, mut events) = TestClient::channel();

    harness
        .embedder
        .create_browser(OPENER_URL, Some(context.clone()), client)
        .await
        .unwrap();

    let (opener, load_url, status) = expect_load_end(&mut events).await;
    assert_eq!(load_url.as_str(), OPENER_URL);
    assert_eq!(status, 200);
    assert!(!opener.is_popup());
    assert!(opener.request_context().is_same(&context));
    assert!(!opener.request_context().is_global());

    state.set_expected(popup_url);
    match mode {
        PopupMode::WindowOpen => opener.execute_script("doPopup()").unwrap(),
        PopupMode::TargetedLink | PopupMode::NoReferrerLink => {
            opener.click(Point::new(20, 20)).unwrap()
        }
    }

    // popup interception fires before the popup exists, with its target url
    let (seen_url, _, forces_new_process) = expect_before_popup(&mut events).await;
    assert_eq!(seen_url.as_str(), popup_url);
    assert_eq!(forces_new_process, mode == PopupMode::NoReferrerLink);

    let (popup, load_url, status) = expect_load_end(&mut events).await;
    assert_eq!(load_url.as_str(), popup_url);
    assert_eq!(status, 200);
    assert!(popup.is_popup());

    // the popup inherits the opener's context in every mode, same- or
    // cross-origin; process placement is the independent axis
    assert!(popup.request_context().is_same(&context));
    assert!(popup.request_context().is_same(&opener.request_context()));
    assert!(!popup.request_context().is_global());
    if mode == PopupMode::NoReferrerLink {
        assert_ne!(popup.render_process_id(), opener.render_process_id());
    } else {
        assert_eq!(popup.render_process_id(), opener.render_process_id());
    }

    popup.close().unwrap();
    let closed = expect_before_close(&mut events).await;
    assert_eq!(closed.id(), popup.id());

    // one supplier invocation per page request, attributed in order
    assert_eq!(
        state.calls(),
        vec![OPENER_URL.to_string(), popup_url.to_string()]
    );

    // both pages' cookies share the one manager
    let cookies = manager.all_cookies().await.unwrap();
    let mut pairs: Vec<(&str, &str)> = cookies
        .iter()
        .map(|c| (c.name.as_str(), c.value.as_str()))
        .collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec![("name1", "value1"), ("name2", "value2")]);

    handler.detach();
}

#[tokio::test]
async fn window_open_popup_inherits_context_same_origin() {
    run_popup_scenario(true, PopupMode::WindowOpen).await;
}

#[tokio::test]
async fn window_open_popup_inherits_context_different_origin() {
    run_popup_scenario(false, PopupMode::WindowOpen).await;
}

#[tokio::test]
async fn targeted_link_popup_inherits_context_same_origin() {
    run_popup_scenario(true, PopupMode::TargetedLink).await;
}

#[tokio::test]
async fn targeted_link_popup_inherits_context_different_origin() {
    run_popup_scenario(false, PopupMode::TargetedLink).await;
}

#[tokio::test]
async fn noreferrer_link_popup_inherits_context_same_origin() {
    run_popup_scenario(true, PopupMode::NoReferrerLink).await;
}

#[tokio::test]
async fn noreferrer_link_popup_inherits_context_different_origin() {
    run_popup_scenario(false, PopupMode::NoReferrerLink).await;
}
