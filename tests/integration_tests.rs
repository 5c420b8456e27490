//! Integration tests for the sparkle library.
//! These tests drive the client over a scripted connection; none touch the network.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sparkle::{
        ConversationTurn, ModelType, Role, ScriptedConnector, Spark, SparkConfig, Step,
        WriterRenderer,
    };

    fn config() -> SparkConfig {
        SparkConfig::new()
            .with_api_key("key")
            .with_api_secret("secret")
            .with_app_id("app-1234")
    }

    fn frame(status: i64, pieces: &[&str]) -> Step {
        let text: Vec<serde_json::Value> = pieces
            .iter()
            .map(|piece| serde_json::json!({"content": piece, "role": "assistant", "index": 0}))
            .collect();
        Step::Frame(
            serde_json::json!({
                "header": {"code": 0, "message": "Success", "sid": "cht000b1234", "status": status},
                "payload": {"choices": {"status": status, "seq": 0, "text": text}}
            })
            .to_string(),
        )
    }

    fn remote_error(code: i64, message: &str) -> Step {
        Step::Frame(
            serde_json::json!({
                "header": {"code": code, "message": message, "sid": "cht000b1234", "status": 2}
            })
            .to_string(),
        )
    }

    fn client(connector: &ScriptedConnector) -> Spark {
        Spark::with_connector(config(), Arc::new(connector.clone())).expect("valid config")
    }

    fn sent_turns(connector: &ScriptedConnector, index: usize) -> Vec<ConversationTurn> {
        let sent = connector.sent();
        let request: serde_json::Value = serde_json::from_str(&sent[index]).unwrap();
        serde_json::from_value(request["payload"]["message"]["text"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_two_fragments_make_one_answer() {
        let connector = ScriptedConnector::new(vec![
            frame(0, &["Hel"]),
            frame(2, &["lo"]),
            Step::normal_close(),
        ]);
        let client = client(&connector);

        let answer = client.send_message("hi").await.unwrap();
        assert_eq!(answer, "Hello");
        assert_eq!(
            client.history(),
            vec![ConversationTurn::user("hi"), ConversationTurn::assistant("Hello")]
        );
    }

    #[tokio::test]
    async fn test_hello_frame_shape() {
        let connector = ScriptedConnector::new(vec![frame(2, &["Hi there"])]);
        let client = client(&connector);
        client.send_message("hello").await.unwrap();

        let sent = connector.sent();
        assert_eq!(sent.len(), 1);
        let request: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(request["header"]["app_id"], "app-1234");
        assert_eq!(request["header"]["uid"].as_str().unwrap().len(), 10);
        assert_eq!(request["parameter"]["chat"]["domain"], "generalv3");
        assert_eq!(request["parameter"]["chat"]["max_tokens"], 4096);
        assert_eq!(
            request["payload"]["message"]["text"],
            serde_json::json!([{"role": "user", "content": "hello"}])
        );
    }

    #[tokio::test]
    async fn test_history_is_sent_with_each_question() {
        let connector = ScriptedConnector::new(vec![frame(2, &["Paris"])]);
        let client = client(&connector);
        client.send_message("capital of France?").await.unwrap();
        client.send_message("and of Italy?").await.unwrap();

        let turns = sent_turns(&connector, 1);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], ConversationTurn::user("capital of France?"));
        assert_eq!(turns[1], ConversationTurn::assistant("Paris"));
        assert_eq!(turns[2], ConversationTurn::user("and of Italy?"));
        assert_eq!(client.history().len(), 4);
    }

    #[tokio::test]
    async fn test_connect_url_is_signed() {
        let connector = ScriptedConnector::new(vec![frame(2, &["ok"])]);
        let client = client(&connector);
        client.send_message("hi").await.unwrap();

        let connected = connector.connected();
        assert_eq!(connected.len(), 1);
        let url = &connected[0];
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("spark-api.xf-yun.com"));
        assert_eq!(url.path(), "/v3.1/chat");
        let params: Vec<String> = url.query_pairs().map(|(name, _)| name.into_owned()).collect();
        assert_eq!(params, vec!["authorization", "date", "host"]);
        assert!(!url.as_str().contains("secret"));
    }

    #[tokio::test]
    async fn test_final_then_close_resolves_once() {
        let connector = ScriptedConnector::new(vec![
            frame(2, &["done"]),
            Step::normal_close(),
            Step::Fail("reset after close".to_string()),
        ]);
        let client = client(&connector);
        assert_eq!(client.send_message("hi").await.unwrap(), "done");
        assert_eq!(client.stats().completed, 1);
        assert_eq!(client.history().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_keeps_user_turn() {
        let connector = ScriptedConnector::new(vec![remote_error(10013, "input audit failed")]);
        let client = client(&connector);

        let err = client.send_message("something").await.unwrap_err();
        assert!(err.is_remote_protocol());
        assert_eq!(err.remote_code(), Some(10013));
        assert_eq!(err.sid(), Some("cht000b1234"));
        // The question stays in the history without an answer.
        assert_eq!(client.history(), vec![ConversationTurn::user("something")]);
    }

    #[tokio::test]
    async fn test_close_before_final() {
        let connector = ScriptedConnector::new(vec![
            frame(1, &["partial"]),
            Step::Close {
                code: Some(1011),
                reason: "server error".to_string(),
            },
        ]);
        let client = client(&connector);

        let err = client.send_message("hi").await.unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("1011"));
        assert!(client.history().last().is_some_and(|turn| turn.role == Role::User));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let connector = ScriptedConnector::refusing("connection refused");
        let client = client(&connector);

        let err = client.send_message("hi").await.unwrap_err();
        assert!(err.is_connection());
        // The connection never opened, so the question was never recorded.
        assert!(client.history().is_empty());
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_undecodable_frame_fails() {
        let connector = ScriptedConnector::new(vec![Step::Frame("not json".to_string())]);
        let client = client(&connector);
        let err = client.send_message("hi").await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(!err.is_remote_protocol());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_final() {
        let connector = ScriptedConnector::new(vec![
            frame(1, &["slow"]),
            Step::Delay(Duration::from_secs(5)),
            frame(2, &[" answer"]),
        ]);
        let client = Spark::with_connector(
            config().with_timeout(Duration::from_secs(1)),
            Arc::new(connector.clone()),
        )
        .unwrap();

        let err = client.send_message("hi").await.unwrap_err();
        assert!(err.is_timeout());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.history(), vec![ConversationTurn::user("hi")]);
        assert_eq!(client.stats().last_fragments, 1);
        assert_eq!(client.stats().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_is_busy() {
        let connector = ScriptedConnector::new(vec![Step::Stall]);
        let client = Arc::new(
            Spark::with_connector(
                config().with_timeout(Duration::from_secs(1)),
                Arc::new(connector.clone()),
            )
            .unwrap(),
        );

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_message("first").await })
        };
        while !client.is_busy() {
            tokio::task::yield_now().await;
        }

        let err = client.send_message("second").await.unwrap_err();
        assert!(err.is_busy());

        let err = first.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.history(), vec![ConversationTurn::user("first")]);

        // Once the first exchange resolved the client accepts work again.
        assert!(!client.is_busy());
    }

    #[tokio::test]
    async fn test_streamed_output() {
        let connector = ScriptedConnector::new(vec![
            frame(0, &["Hel"]),
            frame(1, &["l"]),
            frame(2, &["o"]),
        ]);
        let sink = Arc::new(std::sync::Mutex::new(WriterRenderer::new(Vec::new())));
        let client = Spark::with_connector(config().with_stream_output(true), Arc::new(connector))
            .unwrap()
            .with_output(sink.clone());

        client.send_message("hi").await.unwrap();
        let written = sink.lock().unwrap().get_ref().clone();
        assert_eq!(String::from_utf8(written).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_model_switch_keeps_history() {
        let connector = ScriptedConnector::new(vec![frame(2, &["ok"])]);
        let mut client = client(&connector);
        client.send_message("one").await.unwrap();
        client.set_endpoint(ModelType::Lite.endpoint()).unwrap();
        client.send_message("two").await.unwrap();

        let connected = connector.connected();
        assert_eq!(connected[1].path(), "/v1.1/chat");
        let request: serde_json::Value = serde_json::from_str(&connector.sent()[1]).unwrap();
        assert_eq!(request["parameter"]["chat"]["domain"], "lite");
        assert_eq!(sent_turns(&connector, 1).len(), 3);
    }
}
