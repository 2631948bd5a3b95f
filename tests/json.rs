use fudge_codec::*;
use pretty_assertions::assert_eq;
use test_log::test;

fn settings() -> JsonSettings {
    JsonSettings::default()
}

#[test]
fn scenario_json_to_binary_and_back() {
    let text = r#"{"outer": {"a":7, "b":"fred"}}"#;
    let (header, msg) = from_json_str(text, &settings()).unwrap();

    let mut expected_inner = Message::new();
    expected_inner.add("a", 7_i32);
    expected_inner.add("b", "fred");
    let mut expected = Message::new();
    expected.add("outer", expected_inner);
    assert_eq!(msg, expected);

    let bytes = encode(&header, &msg).unwrap();
    let (_, decoded) = decode(&bytes).unwrap();
    assert_eq!(decoded, expected);

    assert_eq!(
        to_json_string(&header, &decoded, &settings()).unwrap(),
        r#"{"outer":{"a":7,"b":"fred"}}"#
    );
}

#[test]
fn scenario_arrays() {
    let (_, msg) = from_json_str(r#"{"nums": [1,2,4]}"#, &settings()).unwrap();
    assert_eq!(msg.len(), 1);
    assert_eq!(
        msg.first_by_name("nums").map(|f| &f.value),
        Some(&Value::IntArray(vec![1, 2, 4]))
    );

    let (_, msg) = from_json_str(r#"{"mixed":[1,2,"fred",2.3]}"#, &settings()).unwrap();
    assert_eq!(msg.len(), 4);
    let values: Vec<_> = msg.all_by_name("mixed").map(|f| f.value.clone()).collect();
    assert_eq!(values.len(), 4);
    assert_eq!(values[0], Value::Int(1));
    assert_eq!(values[2], Value::String("fred".to_owned()));

    // Repeated fields render back as one JSON array
    assert_eq!(
        to_json_string(&EnvelopeHeader::default(), &msg, &settings()).unwrap(),
        r#"{"mixed":[1,2,"fred",2.3]}"#
    );
}

#[test]
fn scenario_ordinal_name_and_anonymous_keys() {
    let text = r#"{"1":"ord","A":"name","B":"name and ord","":"empty"}"#;
    let (header, msg) = from_json_str(text, &settings()).unwrap();

    assert_eq!(msg.str_by_ordinal(1), Some("ord"));
    assert_eq!(msg.str_by_name("A"), Some("name"));
    let anon = msg.fields().find(|f| f.name.is_none() && f.ordinal.is_none());
    assert_eq!(
        anon.map(|f| &f.value),
        Some(&Value::String("empty".to_owned()))
    );

    assert_eq!(to_json_string(&header, &msg, &settings()).unwrap(), text);
}

#[test]
fn null_and_indicator_are_interchangeable() {
    let (_, msg) = from_json_str(r#"{"gap": null}"#, &settings()).unwrap();
    assert_eq!(
        msg.first_by_name("gap").map(|f| &f.value),
        Some(&Value::Indicator)
    );
    assert_eq!(
        to_json_string(&EnvelopeHeader::default(), &msg, &settings()).unwrap(),
        r#"{"gap":null}"#
    );
}

#[test]
fn json_binary_json_preserves_structure() {
    let text = r#"{"a":[1,2],"b":{"c":"x","c":"y"},"d":-0.125}"#;
    let (header, msg) = from_json_str(text, &settings()).unwrap();
    let bytes = encode(&header, &msg).unwrap();
    let (header2, decoded) = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
    assert_eq!(
        to_json_string(&header2, &decoded, &settings()).unwrap(),
        r#"{"a":[1,2],"b":{"c":["x","y"]},"d":-0.125}"#
    );
}

#[test]
fn envelope_fields_round_trip() {
    let header = EnvelopeHeader {
        processing_directives: 0,
        schema_version: 1,
        taxonomy_id: 12,
    };
    let mut msg = Message::new();
    msg.add("a", 5_i32);
    let text = to_json_string(&header, &msg, &settings()).unwrap();
    assert_eq!(text, r#"{"fudgeSchemaVersion":1,"fudgeTaxonomy":12,"a":5}"#);
    let (restored, msg2) = from_json_str(&text, &settings()).unwrap();
    assert_eq!(restored, header);
    assert_eq!(msg2, msg);
}

#[test]
fn output_is_valid_json() {
    let mut inner = Message::new();
    inner.add("quote", "say \"hi\"\n");
    inner.add("nums", vec![1_i64 << 40, 2]);
    let mut msg = Message::new();
    msg.add("inner", inner);
    msg.add("inner", 7_i32);
    msg.add("when", DateTime::from_ymd(1999, 12, 31));

    let text = to_json_string(&EnvelopeHeader::default(), &msg, &settings()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        parsed,
        serde_json::from_str::<serde_json::Value>(
            r#"{"inner":[{"quote":"say \"hi\"\n","nums":[1099511627776,2]},7],"when":"1999-12-31"}"#
        )
        .unwrap()
    );
}

#[test]
fn negative_offset_renders_in_rfc3339() {
    let dt = DateTime::from_civil(1930, 1, 5, 12, 35, 17, 0)
        .unwrap()
        .with_offset_minutes(-90)
        .unwrap();
    let mut msg = Message::new();
    msg.add("when", dt);
    let text = to_json_string(&EnvelopeHeader::default(), &msg, &settings()).unwrap();
    assert!(text.ends_with(r#"-01:30"}"#), "got {text}");
}

#[test]
fn double_exponent_form() {
    let mut msg = Message::new();
    msg.add("big", 2.375e15_f64);
    assert_eq!(
        to_json_string(&EnvelopeHeader::default(), &msg, &settings()).unwrap(),
        r#"{"big":2.375E+15}"#
    );
}

#[test]
fn concatenated_documents_stream_as_messages() {
    let text = r#"{"n":1} {"n":2}"#;
    let mut reader = JsonStreamReader::new(text.as_bytes(), settings());
    let mut writer = TreeWriter::new();
    let count = pipe(&mut reader, &mut writer).unwrap();
    assert_eq!(count, 2);
    let (_, first) = writer.take_message().unwrap();
    assert_eq!(first.i32_by_name("n"), Some(1));
    let (_, second) = writer.take_message().unwrap();
    assert_eq!(second.i32_by_name("n"), Some(2));
}

#[test]
fn malformed_json_is_an_error() {
    assert!(from_json_str(r#"{"a": }"#, &settings()).is_err());
    assert!(from_json_str(r#"{"a": 1"#, &settings()).is_err());
    assert!(from_json_str(r#"[1,2]"#, &settings()).is_err());
    assert!(matches!(
        from_json_str(r#"{"a": tru}"#, &settings()),
        Err(Error::JsonParse { .. })
    ));
}
