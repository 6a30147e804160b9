mod support;

use stash::cache::CacheConfig;
use support::{FakeHost, visitor};

const TITLES: &str = r#"{exp:stash:set_list name="titles"}{title}y{/title}{title}x{/title}{title}z{/title}{/exp:stash:set_list}"#;

const NUMBERS: &str = r#"{exp:stash:set_list name="nums"}{n}1{/n}{n}2{/n}{n}3{/n}{n}4{/n}{n}5{/n}{/exp:stash:set_list}"#;

#[tokio::test]
async fn list_is_rendered_in_sort_order() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}",
        r#"{exp:stash:get_list name="titles" orderby="title" sort="asc" backspace="1"}{title},{/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "x,y,z");
}

#[tokio::test]
async fn rows_carry_counts() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}",
        r#"{exp:stash:get_list name="titles" limit="2"}{count}/{total_results}/{absolute_results} {/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "1/2/3 2/2/3 ");
}

#[tokio::test]
async fn pagination_follows_the_page_segment() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor().with_path("/numbers/P2")).await;

    let template = format!(
        "{NUMBERS}{}",
        r#"{exp:stash:get_list name="nums" limit="2"}{n}{paginate}|{current_page}/{total_pages}{/paginate}{/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "34|2/3");
}

#[tokio::test]
async fn empty_selection_renders_no_results() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}",
        r##"{exp:stash:get_list name="titles" match="#^q#" against="title"}{title}{if no_results}nothing{/if}{/exp:stash:get_list}"##
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "nothing");
}

#[tokio::test]
async fn appended_rows_extend_the_list() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}{}",
        r#"{exp:stash:append_list name="titles"}{title}w{/title}{/exp:stash:append_list}"#,
        r#"{exp:stash:list_count name="titles"}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "4");
}

#[tokio::test]
async fn split_list_writes_the_selection() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{NUMBERS}{}{}",
        r#"{exp:stash:split_list name="nums" into="tail" offset="3"}"#,
        r#"{exp:stash:get_list name="tail"}{n}{/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "45");
}

#[tokio::test]
async fn joined_lists_keep_source_order() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}{}{}",
        r#"{exp:stash:set_list name="more"}{title}w{/title}{/exp:stash:set_list}"#,
        r#"{exp:stash:join_lists name="all" lists="titles|more"}"#,
        r#"{exp:stash:get_list name="all"}{title}{/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "yxzw");
}

#[tokio::test]
async fn tracked_values_filter_later_lists() {
    let host = FakeHost::new(CacheConfig::default());
    let mut ctx = host.begin(visitor()).await;

    let template = format!(
        "{TITLES}{}|{}|{}",
        r#"{exp:stash:get_list name="titles" limit="2" track="title"}{title}{/exp:stash:get_list}"#,
        r#"{exp:stash:get_list name="titles" not_in="title"}{title}{/exp:stash:get_list}"#,
        r#"{exp:stash:get_list name="titles" in="title"}{title}{/exp:stash:get_list}"#
    );
    let out = host.render(&mut ctx, &template).await.unwrap();

    assert_eq!(out, "yx|z|yx");
}
