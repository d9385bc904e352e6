use crate::Headers;

fn sample() -> Headers {
    let mut headers = Headers::new();
    headers
        .add("Set-Cookie", "a=1")
        .add("Content-Type", "text/plain")
        .add("set-cookie", "b=2");
    headers
}

#[test]
fn get_returns_first_value_case_insensitively() {
    let headers = sample();
    assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
    assert_eq!(headers.get("missing"), None);
    assert!(headers.contains("content-type"));
}

#[test]
fn get_all_preserves_order() {
    let headers = sample();
    assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
    assert!(headers.get_all("missing").is_empty());
}

#[test]
fn names_are_distinct_in_first_seen_order() {
    let headers = sample();
    assert_eq!(headers.names(), vec!["Set-Cookie", "Content-Type"]);
}

#[test]
fn set_replaces_every_value_in_place() {
    let mut headers = sample();
    headers.set("set-cookie", "c=3");

    let pairs: Vec<(&str, &str)> = headers
        .iter()
        .map(|header| (header.name.as_str(), header.value.as_str()))
        .collect();
    assert_eq!(pairs, vec![("set-cookie", "c=3"), ("Content-Type", "text/plain")]);

    headers.set("X-New", "1");
    assert_eq!(headers.len(), 3);
    assert_eq!(headers.iter().last().map(|h| h.name.as_str()), Some("X-New"));
}

#[test]
fn remove_drops_all_values() {
    let mut headers = sample();
    headers.remove("SET-COOKIE");
    assert_eq!(headers.len(), 1);
    assert!(!headers.contains("set-cookie"));

    headers.remove("content-type");
    assert!(headers.is_empty());
}

#[test]
fn collects_from_pairs() {
    let headers: Headers = [("Host", "example.com"), ("Accept", "*/*")]
        .into_iter()
        .collect();
    assert_eq!(headers.get("host"), Some("example.com"));
    assert_eq!(headers.len(), 2);
}
