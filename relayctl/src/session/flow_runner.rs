//! Chatting with a saved flow.
//!
//! A flow answers a question according to its nodes. Planning picks the route and validates its
//! inputs without any network call, so callers can reject bad requests before spending a
//! rate-limit slot; execution then makes the provider calls.
//!
//! Routes, in order of precedence:
//!
//! 1. `LLM Chat` nodes, chained in node order: each node's prompt is the system message and its
//!    answer becomes the next node's question.
//! 2. A document node: knowledge query over the uploaded document with the node's chunking
//!    settings.
//! 3. A URL node: knowledge query over the node's configured URL.
//! 4. An antonym node.
//! 5. Anything else gets a fixed reply and no provider call.

use tracing::{debug, instrument};

use super::graph::{FlowGraph, NodeKind};
use crate::errors::{Error, Result};
use crate::forwarder::{Caller, KnowledgeQuery, KnowledgeQueryInput, ProxyForwarder};
use crate::providers::{Capability, DocumentUpload, PredictionRequest};

pub const UNSUPPORTED_REPLY: &str = "This node type doesn't support chat functionality.";

/// A validated route through a flow
#[derive(Debug, Clone)]
pub enum FlowPlan {
    /// System prompts of the chained chat nodes, in order
    Chain { question: String, prompts: Vec<String> },
    Knowledge(KnowledgeQuery),
    Antonym { question: String },
    Unsupported,
}

impl FlowPlan {
    /// Whether executing the plan calls a provider
    pub fn needs_provider(&self) -> bool {
        !matches!(self, FlowPlan::Unsupported)
    }

    pub fn route(&self) -> &'static str {
        match self {
            FlowPlan::Chain { .. } => "chain",
            FlowPlan::Knowledge(_) => "knowledge",
            FlowPlan::Antonym { .. } => "antonym",
            FlowPlan::Unsupported => "unsupported",
        }
    }
}

pub struct FlowRunner<'a> {
    forwarder: &'a ProxyForwarder,
}

impl<'a> FlowRunner<'a> {
    pub fn new(forwarder: &'a ProxyForwarder) -> Self {
        Self { forwarder }
    }

    /// Choose the route for `question` and validate its inputs.
    pub fn plan(&self, graph: FlowGraph<'_>, question: &str, document: Option<DocumentUpload>) -> Result<FlowPlan> {
        graph.validate().map_err(|e| Error::BadRequest { message: e.to_string() })?;

        let question = question.trim();
        if question.is_empty() {
            return Err(Error::BadRequest {
                message: "question is required".to_string(),
            });
        }

        let prompts: Vec<String> = graph.chat_nodes().map(|n| n.prompt().to_string()).collect();
        if !prompts.is_empty() {
            return Ok(FlowPlan::Chain {
                question: question.to_string(),
                prompts,
            });
        }

        if let Some(node) = graph.find(NodeKind::Document) {
            if document.is_none() {
                return Err(Error::BadRequest {
                    message: "This flow answers from a document; upload a file with your question".to_string(),
                });
            }
            let query = self.forwarder.validate_knowledge_query(KnowledgeQueryInput {
                question: Some(question.to_string()),
                document,
                url: None,
                chunk_size: node.data_u32("chunkSize"),
                chunk_overlap: node.data_u32("chunkOverlap"),
                top_k: node.data_u32("topK"),
            })?;
            return Ok(FlowPlan::Knowledge(query));
        }

        if let Some(node) = graph.find(NodeKind::Url) {
            let query = self.forwarder.validate_knowledge_query(KnowledgeQueryInput {
                question: Some(question.to_string()),
                url: Some(node.data_str("url").unwrap_or_default().to_string()),
                ..Default::default()
            })?;
            return Ok(FlowPlan::Knowledge(query));
        }

        if graph.find(NodeKind::Antonym).is_some() {
            return Ok(FlowPlan::Antonym {
                question: question.to_string(),
            });
        }

        Ok(FlowPlan::Unsupported)
    }

    /// Run a plan and return the final answer.
    #[instrument(skip_all, fields(route = plan.route()), err)]
    pub async fn execute(&self, caller: &Caller, plan: FlowPlan) -> Result<String> {
        match plan {
            FlowPlan::Chain { question, prompts } => {
                let mut input = question;
                for (step, prompt) in prompts.into_iter().enumerate() {
                    let request = PredictionRequest {
                        system_message_prompt: Some(prompt),
                        ..PredictionRequest::question(input)
                    };
                    input = self.forwarder.forward_prediction(Capability::GeneralChat, request).await?;
                    debug!(step, "Chat node answered");
                }
                Ok(input)
            }
            FlowPlan::Knowledge(query) => self.forwarder.forward_knowledge_query(caller, query).await,
            FlowPlan::Antonym { question } => {
                self.forwarder
                    .forward_prediction(Capability::Antonym, PredictionRequest::question(question))
                    .await
            }
            FlowPlan::Unsupported => Ok(UNSUPPORTED_REPLY.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::forwarder::document_upload;
    use crate::providers::dummy::{DummyChatProvider, DummyVoiceProvider, DummyWorkflowProvider};
    use crate::session::graph::{FlowEdge, FlowNode, NodePosition};
    use crate::test_utils::create_test_config;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::Arc;

    fn node(id: &str, data: serde_json::Value) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            node_type: "custom".to_string(),
            position: NodePosition::default(),
            data,
        }
    }

    fn setup() -> (ProxyForwarder, Arc<DummyWorkflowProvider>) {
        let workflow = Arc::new(DummyWorkflowProvider::default());
        let forwarder = ProxyForwarder::new(
            &create_test_config(),
            Database::in_memory(),
            Arc::new(DummyChatProvider::new("unused")),
            workflow.clone(),
            Arc::new(DummyVoiceProvider::default()),
        );
        (forwarder, workflow)
    }

    fn caller() -> Caller {
        Caller::new(Some("user_1".to_string()), Some("ada".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_two_chat_nodes_chain_in_order() {
        let (forwarder, workflow) = setup();
        let nodes = vec![
            node("1", json!({"nodeType": "LLM Chat", "prompt": "Translate to French"})),
            node("2", json!({"nodeType": "LLM Chat", "prompt": "Make it rhyme"})),
        ];
        let edges = vec![FlowEdge {
            id: None,
            source: "1".to_string(),
            target: "2".to_string(),
            edge_type: None,
        }];

        let runner = FlowRunner::new(&forwarder);
        let plan = runner.plan(FlowGraph::new(&nodes, &edges), "good morning", None).unwrap();
        let answer = runner.execute(&caller(), plan).await.unwrap();

        assert_eq!(answer, "Make it rhyme: Translate to French: good morning");
        let calls = workflow.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.question, "Translate to French: good morning");
    }

    #[tokio::test]
    async fn test_chain_generalises_to_n_nodes() {
        let (forwarder, workflow) = setup();
        let nodes: Vec<FlowNode> = (1..=4)
            .map(|i| node(&i.to_string(), json!({"nodeType": "LLM Chat", "prompt": format!("p{i}")})))
            .collect();

        let runner = FlowRunner::new(&forwarder);
        let plan = runner.plan(FlowGraph::new(&nodes, &[]), "x", None).unwrap();
        assert_eq!(runner.execute(&caller(), plan).await.unwrap(), "p4: p3: p2: p1: x");
        assert_eq!(workflow.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_document_node_requires_upload() {
        let (forwarder, workflow) = setup();
        let nodes = vec![node("1", json!({"nodeType": "LLM Chat PDF", "chunkSize": 500, "chunkOverlap": 50}))];
        let runner = FlowRunner::new(&forwarder);

        let err = runner.plan(FlowGraph::new(&nodes, &[]), "summarise", None).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        let document = document_upload(Some("report.pdf".to_string()), None, Bytes::from_static(b"%PDF-1.4"));
        let plan = runner.plan(FlowGraph::new(&nodes, &[]), "summarise", Some(document)).unwrap();
        let FlowPlan::Knowledge(ref query) = plan else {
            panic!("expected a knowledge plan");
        };
        assert_eq!(query.chunk_size, 500);
        assert_eq!(query.chunk_overlap, 50);

        let answer = runner.execute(&caller(), plan).await.unwrap();
        assert_eq!(answer, "According to report.pdf: summarise");
        assert_eq!(workflow.calls()[0].0, Capability::DocumentQa);
    }

    #[tokio::test]
    async fn test_url_and_antonym_routes() {
        let (forwarder, _) = setup();
        let runner = FlowRunner::new(&forwarder);

        let url_nodes = vec![node("1", json!({"nodeType": "URL", "url": "https://example.com/docs"}))];
        let plan = runner.plan(FlowGraph::new(&url_nodes, &[]), "what is it?", None).unwrap();
        assert_eq!(
            runner.execute(&caller(), plan).await.unwrap(),
            "According to https://example.com/docs: what is it?"
        );

        let antonym_nodes = vec![node("1", json!({"nodeType": "LLM Antonim"}))];
        let plan = runner.plan(FlowGraph::new(&antonym_nodes, &[]), "hot", None).unwrap();
        assert_eq!(runner.execute(&caller(), plan).await.unwrap(), "opposite of hot");
    }

    #[tokio::test]
    async fn test_unsupported_flow_gets_fixed_reply_without_provider_call() {
        let (forwarder, workflow) = setup();
        let nodes = vec![node("1", json!({"nodeType": "Start"})), node("2", json!({"nodeType": "END"}))];
        let runner = FlowRunner::new(&forwarder);

        let plan = runner.plan(FlowGraph::new(&nodes, &[]), "hello", None).unwrap();
        assert!(!plan.needs_provider());
        assert_eq!(runner.execute(&caller(), plan).await.unwrap(), UNSUPPORTED_REPLY);
        assert!(workflow.calls().is_empty());
    }

    #[test]
    fn test_invalid_graph_is_rejected() {
        let (forwarder, _) = setup();
        let nodes = vec![node("1", json!({"nodeType": "LLM Chat"})), node("1", json!({}))];
        let err = FlowRunner::new(&forwarder)
            .plan(FlowGraph::new(&nodes, &[]), "hello", None)
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { message } if message.contains("duplicate")));
    }
}
