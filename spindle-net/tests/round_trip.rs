use spindle_net::{Method, Request, serialize_request};

fn parse_with_httparse(bytes: &[u8]) -> (String, String, Vec<(String, String)>, usize) {
    let mut storage = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Request::new(&mut storage);
    let status = parsed.parse(bytes).unwrap();
    let consumed = match status {
        httparse::Status::Complete(consumed) => consumed,
        httparse::Status::Partial => panic!("reference parser wanted more input"),
    };
    assert_eq!(parsed.version, Some(1));

    let headers = parsed
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8(header.value.to_vec()).unwrap(),
            )
        })
        .collect();
    (
        parsed.method.unwrap().to_string(),
        parsed.path.unwrap().to_string(),
        headers,
        consumed,
    )
}

#[test]
fn get_request_round_trips_through_reference_parser() {
    let request = Request::get("/search?q=rust")
        .header("Host", "localhost:8080")
        .header("Accept", "text/html")
        .header("Cookie", "a=1")
        .header("Cookie", "b=2")
        .build();

    let bytes = serialize_request(&request).unwrap();
    let (method, path, headers, consumed) = parse_with_httparse(&bytes);

    assert_eq!(method, "GET");
    assert_eq!(path, "/search?q=rust");
    assert_eq!(consumed, bytes.len());
    let expected: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|header| (header.name.clone(), header.value.clone()))
        .collect();
    assert_eq!(headers, expected);
}

#[test]
fn request_with_body_round_trips() {
    let request = Request::builder(Method::POST, "/items")
        .header("Host", "localhost")
        .header("Content-Length", "7")
        .body(&b"payload"[..])
        .build();

    let bytes = serialize_request(&request).unwrap();
    let (method, path, headers, consumed) = parse_with_httparse(&bytes);

    assert_eq!(method, "POST");
    assert_eq!(path, "/items");
    assert_eq!(headers.len(), 2);
    assert_eq!(&bytes[consumed..], b"payload");
}

#[test]
fn every_common_method_round_trips() {
    for method in [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::PATCH,
    ] {
        let request = Request::builder(method.clone(), "/")
            .header("Host", "h")
            .build();
        let bytes = serialize_request(&request).unwrap();
        let (parsed_method, _, _, _) = parse_with_httparse(&bytes);
        assert_eq!(parsed_method, method.as_str());
    }
}
