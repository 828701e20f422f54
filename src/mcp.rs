use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    concepts::TermFrequencyExtractor,
    config::HopnotesConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{self, ErrorKind},
    extractive::ExtractiveAnswerer,
    model_manager::LocalEmbedder,
    multi_hop::{Answer, Orchestrator},
    provider::{
        AnswerGenerator,
        ConceptExtractor,
        EmbeddingProvider,
        Role,
        Turn,
        embed_validated,
    },
    search::{self, Retrieved, SearchParams},
    store::NoteStore,
    text_util::snippet,
};

const SNIPPET_CHARS: usize = 400;

struct HopnotesState {
    store: NoteStore,
    config_db: ConfigDb,
    config: HopnotesConfig,
    model_id: String,
    embedder: Box<dyn EmbeddingProvider>,
    extractor: Box<dyn ConceptExtractor>,
    answerer: Box<dyn AnswerGenerator>,
}

#[derive(Clone)]
pub struct HopnotesMcpServer {
    state: Arc<HopnotesState>,
    tool_router: ToolRouter<Self>,
}

impl HopnotesMcpServer {
    fn new(state: HopnotesState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        let state = &*self.state;
        Orchestrator::new(
            &state.store,
            state.embedder.as_ref(),
            state.extractor.as_ref(),
            state.answerer.as_ref(),
            state.config.retrieval,
            state.config.provider_timeout,
        )
    }
}

#[tool_router(router = tool_router)]
impl HopnotesMcpServer {
    /// Rank indexed chunks against a query.
    #[tool(
        name = "hopnotes_search",
        description = "Semantic search over indexed note chunks. Returns the best matching passages with their note ids and scores."
    )]
    pub async fn hopnotes_search(
        &self,
        params: Parameters<SearchToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let defaults = self.state.config.retrieval.single_hop;
        let search_params = SearchParams {
            k: params.limit.unwrap_or(defaults.k),
            min_score: params.min_score.unwrap_or(defaults.min_score),
            max_per_document: params
                .per_note
                .unwrap_or(defaults.max_per_document),
        };

        let query = embed_validated(
            self.state.embedder.as_ref(),
            std::slice::from_ref(&params.query),
            self.state.config.provider_timeout,
        )
        .await
        .map_err(|e| mcp_error("query embedding failed", e))?
        .pop()
        .ok_or_else(|| {
            rmcp::ErrorData::internal_error("no query vector", None)
        })?;

        let results =
            search::search_top_k(&self.state.store, &query, &search_params)
                .map_err(|e| mcp_error("search failed", e))?;

        let items: Vec<SearchResultItem> =
            results.into_iter().map(SearchResultItem::from).collect();
        let summary = format_search_summary(&items, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: items.len(),
            results: items,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(CallToolResult {
            content: vec![Content::text(summary)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Answer a question with multi-hop retrieval.
    #[tool(
        name = "hopnotes_ask",
        description = "Answer a question from the indexed notes. Expands the query with related concepts unless singleHop is set. Returns the answer, citations and the chunks used as context."
    )]
    pub async fn hopnotes_ask(
        &self,
        params: Parameters<AskToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let history: Vec<Turn> = params
            .history
            .unwrap_or_default()
            .into_iter()
            .map(Turn::from)
            .collect();

        let orchestrator = self.orchestrator();
        let answer = if params.single_hop.unwrap_or(false) {
            orchestrator.ask_single_hop(&params.question, &history).await
        } else {
            orchestrator.ask(&params.question, &history).await
        }
        .map_err(|e| mcp_error("ask failed", e))?;

        let summary = format_answer(&answer);
        let structured = serde_json::to_value(&answer)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;

        Ok(CallToolResult {
            content: vec![Content::text(summary)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Fetch the stored chunks of one note.
    #[tool(
        name = "hopnotes_get",
        description = "Return the indexed chunks of a note by id (collection:relative/path)."
    )]
    pub async fn hopnotes_get(
        &self,
        params: Parameters<GetToolParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let note_id = params.0.note_id;
        let document = self
            .state
            .store
            .get_document(&note_id)
            .map_err(|e| mcp_error("failed to read note", e))?;
        let chunks = self
            .state
            .store
            .get_chunks_by_document(&note_id)
            .map_err(|e| mcp_error("failed to read chunks", e))?;

        if document.is_none() && chunks.is_empty() {
            return Err(rmcp::ErrorData::invalid_params(
                format!("note not found: {note_id}"),
                None,
            ));
        }

        let text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let structured = json!({
            "noteId": note_id,
            "title": document.as_ref().map(|d| d.title.as_str()),
            "complete": document.is_some(),
            "chunks": chunks,
        });

        Ok(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Report index counts and the active model.
    #[tool(
        name = "hopnotes_status",
        description = "Show how many notes, chunks and vectors are indexed, and which embedding model is configured."
    )]
    pub async fn hopnotes_status(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self
            .state
            .store
            .stats()
            .map_err(|e| mcp_error("failed to read index stats", e))?;
        let collections: Vec<_> = self
            .state
            .config_db
            .list_collections()
            .map_err(|e| mcp_error("failed to list collections", e))?
            .into_iter()
            .map(|(name, path)| json!({ "name": name, "path": path }))
            .collect();

        let summary = format!(
            "{} collections, {} notes, {} chunks, {} embedded (model: {})",
            collections.len(),
            stats.documents,
            stats.chunks,
            stats.vectors,
            self.state.model_id
        );
        let structured = json!({
            "model": self.state.model_id,
            "collections": collections,
            "documents": stats.documents,
            "chunks": stats.chunks,
            "vectors": stats.vectors,
            "config": self.state.config,
        });

        Ok(CallToolResult {
            content: vec![Content::text(summary)],
            structured_content: Some(structured),
            is_error: Some(false),
            meta: None,
        })
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for HopnotesMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "hopnotes".to_string(),
                title: Some("hopnotes MCP".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Use hopnotes_ask for questions that may need facts from several notes. Use hopnotes_search to look up passages, then hopnotes_get to read a whole note."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchToolParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: the single_hop_k setting).
    pub limit: Option<usize>,
    /// Minimum cosine similarity.
    pub min_score: Option<f32>,
    /// Maximum passages returned from one note.
    pub per_note: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskToolParams {
    /// The question to answer.
    pub question: String,
    /// Skip concept expansion.
    pub single_hop: Option<bool>,
    /// Earlier turns of the conversation, oldest first.
    pub history: Option<Vec<HistoryTurn>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetToolParams {
    /// Note id, e.g. `notes:biology/cells.md`.
    pub note_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HistoryTurn {
    pub role: HistoryRole,
    pub content: String,
}

impl From<HistoryTurn> for Turn {
    fn from(turn: HistoryTurn) -> Self {
        let role = match turn.role {
            HistoryRole::User => Role::User,
            HistoryRole::Assistant => Role::Assistant,
        };
        Self {
            role,
            content: turn.content,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
    chunk_id: String,
    note_id: String,
    title: String,
    score: f32,
    snippet: String,
}

impl From<Retrieved> for SearchResultItem {
    fn from(r: Retrieved) -> Self {
        Self {
            snippet: snippet(&r.text, SNIPPET_CHARS),
            chunk_id: r.chunk_id,
            note_id: r.note_id,
            title: r.note_title,
            score: r.score,
        }
    }
}

fn format_search_summary(results: &[SearchResultItem], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for item in results {
        lines.push(format!("{:.3} {} {}", item.score, item.note_id, item.chunk_id));
    }

    lines.join("\n")
}

fn format_answer(answer: &Answer) -> String {
    let mut out = answer.answer.clone();
    for (i, c) in answer.citations.iter().enumerate() {
        out.push_str(&format!("\n[{}] {}: \"{}\"", i + 1, c.note_id, c.quote));
    }
    out
}

fn mcp_error(message: &str, error: error::Error) -> rmcp::ErrorData {
    let data = Some(json!({ "error": error.to_string() }));
    match error.kind() {
        ErrorKind::InvalidInput => {
            rmcp::ErrorData::invalid_params(message.to_string(), data)
        }
        _ => rmcp::ErrorData::internal_error(message.to_string(), data),
    }
}

pub fn run_mcp(
    data_dir: DataDir,
    config_db: ConfigDb,
    model_id: String,
) -> error::Result<()> {
    let config = HopnotesConfig::load(&config_db)?;
    let store = NoteStore::open(&data_dir.notes_db())?;

    let state = HopnotesState {
        store,
        config_db,
        embedder: Box::new(LocalEmbedder::new(model_id.clone())),
        extractor: Box::new(TermFrequencyExtractor::new(
            config.retrieval.max_concepts,
        )),
        answerer: Box::new(ExtractiveAnswerer::default()),
        config,
        model_id,
    };

    let server = HopnotesMcpServer::new(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}
