//! Local function execution service.
//!
//! Keywords are closures registered by name. Agents are plain attribute maps;
//! a reservation picks the first agent whose attributes match every interest
//! regex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_ports::{
    FunctionExecutionService, FunctionInput, FunctionOutput, FunctionRef, PortsError, Token,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;

type Keyword =
    Arc<dyn Fn(FunctionInput) -> BoxFuture<'static, Result<FunctionOutput, PortsError>> + Send + Sync>;

/// Runs keywords in-process.
pub struct LocalFunctionService {
    keywords: DashMap<String, Keyword>,
    agents: Vec<BTreeMap<String, String>>,
    outstanding: DashMap<String, Token>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    reserved: AtomicUsize,
    released: AtomicUsize,
}

impl std::fmt::Debug for LocalFunctionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFunctionService")
            .field("keywords", &self.keywords.len())
            .field("agents", &self.agents)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

impl Default for LocalFunctionService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFunctionService {
    /// A service with a single agent that has no attributes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keywords: DashMap::new(),
            agents: vec![BTreeMap::new()],
            outstanding: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            reserved: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Replace the agent list.
    #[must_use]
    pub fn with_agents(mut self, agents: Vec<BTreeMap<String, String>>) -> Self {
        self.agents = agents;
        self
    }

    /// Register a synchronous keyword.
    pub fn register<F>(&self, name: impl Into<String>, keyword: F)
    where
        F: Fn(FunctionInput) -> Result<FunctionOutput, PortsError> + Send + Sync + 'static,
    {
        let keyword = Arc::new(keyword);
        self.register_async(name, move |input| {
            let keyword = Arc::clone(&keyword);
            async move { keyword(input) }.boxed()
        });
    }

    /// Register an asynchronous keyword.
    pub fn register_async<F>(&self, name: impl Into<String>, keyword: F)
    where
        F: Fn(FunctionInput) -> BoxFuture<'static, Result<FunctionOutput, PortsError>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        tracing::debug!(keyword = %name, "registered keyword");
        self.keywords.insert(name, Arc::new(keyword));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_keyword<F>(self, name: impl Into<String>, keyword: F) -> Self
    where
        F: Fn(FunctionInput) -> Result<FunctionOutput, PortsError> + Send + Sync + 'static,
    {
        self.register(name, keyword);
        self
    }

    /// Tokens reserved so far.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Tokens released so far.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Tokens currently held.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Every invocation so far as `(function, payload)`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().clone()
    }

    fn select_agent(
        &self,
        interests: &BTreeMap<String, String>,
    ) -> Result<Option<BTreeMap<String, String>>, PortsError> {
        let mut patterns = Vec::with_capacity(interests.len());
        for (key, pattern) in interests {
            let regex = Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|e| PortsError::expression(pattern.clone(), e.to_string()))?;
            patterns.push((key, regex));
        }
        Ok(self
            .agents
            .iter()
            .find(|agent| {
                patterns.iter().all(|(key, regex)| {
                    agent
                        .get(key.as_str())
                        .is_some_and(|value| regex.is_match(value))
                })
            })
            .cloned())
    }
}

#[async_trait]
impl FunctionExecutionService for LocalFunctionService {
    async fn reserve(
        &self,
        attributes: BTreeMap<String, String>,
        interests: BTreeMap<String, String>,
    ) -> Result<Token, PortsError> {
        let Some(agent) = self.select_agent(&interests)? else {
            return Err(PortsError::TokenUnavailable {
                criteria: format!("{interests:?}"),
            });
        };
        let token = Token {
            id: uuid::Uuid::new_v4().to_string(),
            attributes: agent,
        };
        tracing::trace!(token = %token.id, ?attributes, "reserved token");
        self.outstanding.insert(token.id.clone(), token.clone());
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn invoke(
        &self,
        token: &Token,
        function: &FunctionRef,
        input: FunctionInput,
    ) -> Result<FunctionOutput, PortsError> {
        if !self.outstanding.contains_key(&token.id) {
            return Err(PortsError::not_found("Token", token.id.clone()));
        }
        let keyword = self
            .keywords
            .get(&function.name)
            .map(|k| Arc::clone(k.value()))
            .ok_or_else(|| PortsError::not_found("Function", function.name.clone()))?;
        self.calls
            .lock()
            .push((function.name.clone(), input.payload.clone()));
        keyword(input).await
    }

    async fn release(&self, token: Token) -> Result<(), PortsError> {
        if self.outstanding.remove(&token.id).is_none() {
            return Err(PortsError::not_found("Token", token.id));
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn agent(os: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("os".to_owned(), os.to_owned())])
    }

    #[tokio::test]
    async fn reserve_invoke_release() {
        let service = LocalFunctionService::new().with_keyword("Echo", |input| {
            Ok(FunctionOutput::success(input.payload))
        });
        let token = service.reserve(BTreeMap::new(), BTreeMap::new()).await.unwrap();
        let out = service
            .invoke(
                &token,
                &FunctionRef::new("Echo"),
                FunctionInput {
                    payload: json!({"x": 1}),
                    ..FunctionInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(out.payload, json!({"x": 1}));
        assert_eq!(service.outstanding(), 1);
        service.release(token).await.unwrap();
        assert_eq!((service.reserved(), service.released(), service.outstanding()), (1, 1, 0));
        assert_eq!(service.calls(), vec![("Echo".to_owned(), json!({"x": 1}))]);
    }

    #[tokio::test]
    async fn interests_select_matching_agent() {
        let service = LocalFunctionService::new().with_agents(vec![agent("windows"), agent("linux")]);
        let interests = BTreeMap::from([("os".to_owned(), "lin.*".to_owned())]);
        let token = service.reserve(BTreeMap::new(), interests).await.unwrap();
        assert_eq!(token.attributes, agent("linux"));

        let none = BTreeMap::from([("os".to_owned(), "mac".to_owned())]);
        let err = service.reserve(BTreeMap::new(), none).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_function_and_token() {
        let service = LocalFunctionService::new();
        let token = service.reserve(BTreeMap::new(), BTreeMap::new()).await.unwrap();
        let err = service
            .invoke(&token, &FunctionRef::new("Missing"), FunctionInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortsError::NotFound { .. }));

        service.release(token.clone()).await.unwrap();
        assert!(service.release(token).await.is_err());
    }

    #[tokio::test]
    async fn async_keyword_runs() {
        let service = LocalFunctionService::new();
        service.register_async("Slow", |_| {
            async {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                Ok(FunctionOutput::success(json!("done")))
            }
            .boxed()
        });
        let token = service.reserve(BTreeMap::new(), BTreeMap::new()).await.unwrap();
        let out = service
            .invoke(&token, &FunctionRef::new("Slow"), FunctionInput::default())
            .await
            .unwrap();
        assert_eq!(out.payload, json!("done"));
    }
}
