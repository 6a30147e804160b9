mod support;

use stash::application::tag::Tag;
use stash::application::verb::Verb;
use stash::cache::CacheConfig;
use support::{FakeHost, visitor};

#[tokio::test]
async fn deferred_tags_replay_by_ascending_priority() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let out = host
        .render(
            &mut ctx,
            concat!(
                r#"{exp:stash:append_value name="log" value="5" process="end" priority="5"}"#,
                r#"{exp:stash:append_value name="log" value="1" process="end" priority="1"}"#,
                r#"{exp:stash:append_value name="log" value="3" process="end" priority="3"}"#,
                r#"[{exp:stash:get name="log" process="end" priority="10"}]"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(out, "[135]");
    assert_eq!(ctx.pending_deferrals(), 0);
}

#[tokio::test]
async fn deferred_read_sees_later_writes() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let out = host
        .render(
            &mut ctx,
            concat!(
                r#"<title>{exp:stash:get name="title" process="end"}</title>"#,
                r#"{exp:stash:set_value name="title" value="Late"}"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(out, "<title>Late</title>");
}

#[tokio::test]
async fn missing_placeholder_keeps_the_entry_and_replay_is_at_most_once() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let tag = Tag::new(r#"{exp:stash:set_value name="x" value="1" process="end"}"#)
        .with_param("name", "x")
        .with_param("value", "1")
        .with_param("process", "end")
        .with_param("output", "yes");
    let placeholder = host
        .stash
        .call(&mut ctx, &host, Verb::SetValue, tag, 0)
        .await
        .unwrap();
    assert!(placeholder.starts_with("{stash_deferred_"));

    let out = host
        .stash
        .finalize(&mut ctx, &host, "no marker here".to_string())
        .await
        .unwrap();
    assert_eq!(out, "no marker here");
    assert_eq!(ctx.pending_deferrals(), 1);

    let template = format!("<{placeholder}>");
    let out = host
        .stash
        .finalize(&mut ctx, &host, template.clone())
        .await
        .unwrap();
    assert_eq!(out, "<1>");
    assert_eq!(ctx.pending_deferrals(), 0);

    let out = host
        .stash
        .finalize(&mut ctx, &host, template.clone())
        .await
        .unwrap();
    assert_eq!(out, template);
}

#[tokio::test]
async fn context_cannot_be_deferred() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let err = host
        .render(&mut ctx, r#"{exp:stash:context name="blog" process="end"}"#)
        .await
        .unwrap_err();

    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn expansion_is_idempotent_without_tags() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let body = "<p>{plain} text {if x == 1}maybe{/if}</p>";
    let once = host
        .render(
            &mut ctx,
            &format!(r#"{{exp:stash:parse parse_depth="1"}}{body}{{/exp:stash:parse}}"#),
        )
        .await
        .unwrap();
    let many = host
        .render(
            &mut ctx,
            &format!(r#"{{exp:stash:parse parse_depth="4"}}{body}{{/exp:stash:parse}}"#),
        )
        .await
        .unwrap();

    assert_eq!(once, many);
}

#[tokio::test]
async fn nocache_regions_survive_expansion_and_lose_their_markers() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let out = host
        .render(
            &mut ctx,
            concat!(
                r#"{exp:stash:set_value name="who" value="Ada"}"#,
                r#"{exp:stash:parse}{stash:who}|{stash:nocache}{stash:who}{/stash:nocache}{/exp:stash:parse}"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(out, "Ada|{stash:who}");
}

#[tokio::test]
async fn nested_tags_inside_parsed_bodies_run() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let out = host
        .render(
            &mut ctx,
            concat!(
                r#"{exp:stash:set_value name="a" value="inner"}"#,
                r#"{exp:stash:set name="wrapper" parse_tags="yes"}<b>{exp:stash:get name="a"}</b>{/exp:stash:set}"#,
                r#"{exp:stash:get name="wrapper"}"#,
            ),
        )
        .await
        .unwrap();

    assert_eq!(out, "<b>inner</b>");
}
