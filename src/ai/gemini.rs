use reqwest::Client;

use super::Analyzer;
use crate::core::analysis::{parse_model_json, AiAnalysis, MergeCandidate, MergeSuggestion};
use crate::error::AnalysisError;

/// Cap on note text sent for analysis, to stay within a small token budget.
const MAX_CONTENT_CHARS: usize = 8000;

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self, AnalysisError> {
        if api_key.trim().is_empty() {
            return Err(AnalysisError::NotConfigured);
        }
        let http = Client::builder()
            .build()
            .map_err(|e| AnalysisError::Request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Verify the API key with a minimal request.
    pub async fn check_api_key(&self) -> Result<String, AnalysisError> {
        self.generate("Reply with OK", 4).await?;
        Ok("API key valid".to_string())
    }

    /// Send one prompt and return the first candidate's text.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AnalysisError> {
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": 0.2
            }
        });

        let resp = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::Http {
                status: status.as_u16(),
                message: text,
            });
        }

        let api_resp: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(format!("Failed to parse API response: {}", e)))?;

        // Concatenate the text parts of the first candidate
        let text: String = api_resp["candidates"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|c| c["content"]["parts"].as_array())
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(text)
    }
}

impl Analyzer for GeminiClient {
    async fn analyze(&self, plain_text: &str) -> Result<AiAnalysis, AnalysisError> {
        let capped: String = plain_text.chars().take(MAX_CONTENT_CHARS).collect();
        let text = self.generate(&build_analysis_prompt(&capped), 256).await?;
        let analysis: AiAnalysis = parse_model_json(&text)?;
        Ok(analysis.normalized())
    }

    async fn suggest_merge(
        &self,
        notes: &[MergeCandidate],
    ) -> Result<MergeSuggestion, AnalysisError> {
        if notes.len() < 2 {
            return Ok(MergeSuggestion::default());
        }
        let text = self.generate(&build_merge_prompt(notes), 1024).await?;
        parse_model_json(&text)
    }
}

fn build_analysis_prompt(content: &str) -> String {
    format!(
        "Analyze the following note content and extract:\n\
         1. A one-line summary (max 10 words).\n\
         2. 3-5 relevant short tags (lowercase, single word).\n\
         3. Optionally, a single emoji capturing the mood of the note.\n\n\
         Return ONLY JSON in this format, no explanation:\n\
         {{\n  \"summary\": \"...\",\n  \"tags\": [\"tag1\", \"tag2\"],\n  \"mood\": \"🙂\"\n}}\n\n\
         Note Content:\n{}",
        content
    )
}

fn build_merge_prompt(notes: &[MergeCandidate]) -> String {
    let mut prompt = String::from(
        "You help keep a personal notes feed tidy. Given the notes below, decide whether \
         two or more of them cover the same topic and should be merged into one.\n\n\
         Return ONLY a JSON object, no explanation:\n\
         {\n  \"shouldMerge\": true | false,\n  \"noteIds\": [\"<id>\", ...],\n  \
         \"mergedTitle\": \"...\",\n  \"mergedContent\": \"plain text, newlines allowed\"\n}\n\
         Only include noteIds, mergedTitle and mergedContent when shouldMerge is true.\n\n",
    );
    for note in notes {
        prompt.push_str(&format!(
            "--- id: {} ---\nTitle: {}\n{}\n\n",
            note.id, note.title, note.content
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [ { "text": text } ] } }
            ]
        })
    }

    async fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&server.uri(), "gemini-1.5-flash", "k").unwrap()
    }

    #[test]
    fn empty_key_is_not_configured() {
        assert!(matches!(
            GeminiClient::new("http://x", "m", " "),
            Err(AnalysisError::NotConfigured)
        ));
    }

    #[test]
    fn analysis_prompt_embeds_content() {
        let p = build_analysis_prompt("Buy milk and eggs");
        assert!(p.ends_with("Note Content:\nBuy milk and eggs"));
        assert!(p.contains("\"tags\""));
    }

    #[tokio::test]
    async fn analyze_parses_fenced_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(
                "```json\n{\"summary\": \"Groceries for the week\", \"tags\": [\"groceries\", \"shopping\"]}\n```",
            )))
            .mount(&server)
            .await;

        let analysis = client_for(&server)
            .await
            .analyze("Buy milk and eggs for the week")
            .await
            .unwrap();
        assert_eq!(analysis.tags, vec!["groceries", "shopping"]);
        assert_eq!(analysis.summary, "Groceries for the week");
    }

    #[tokio::test]
    async fn malformed_reply_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("no idea")))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).await.analyze("something long enough").await;
        assert!(matches!(err, Err(AnalysisError::Malformed(_))));
    }

    #[tokio::test]
    async fn api_errors_keep_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.analyze("something").await.unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Http {
                status: 429,
                message: "quota".into()
            }
        );
    }

    #[tokio::test]
    async fn merge_suggestion_is_decoded() {
        let server = MockServer::start().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let text = format!(
            r#"{{"shouldMerge": true, "noteIds": ["{a}", "{b}"], "mergedTitle": "Groceries", "mergedContent": "milk\neggs"}}"#
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(&text)))
            .mount(&server)
            .await;

        let notes = vec![
            MergeCandidate { id: a, title: "Milk".into(), content: "milk".into() },
            MergeCandidate { id: b, title: "Eggs".into(), content: "eggs".into() },
        ];
        let s = client_for(&server).await.suggest_merge(&notes).await.unwrap();
        assert!(s.is_actionable());
        assert_eq!(s.note_ids, vec![a, b]);
    }
}
