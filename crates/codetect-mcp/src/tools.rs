//! MCP tool definitions for codetect.
//!
//! Each tool is annotated with `#[tool]` and returns its JSON result
//! object serialized into the text content. Tools never raise for a
//! disabled component; they answer `{available: false}` and keep
//! serving whatever subset works.

use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
    ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;

use codetect_core::tools::SemanticTools;
use codetect_core::Engine;

const DEFAULT_TOP_K: usize = 10;

// -----------------------------------------------------------------------
// Parameter structs for each tool
// -----------------------------------------------------------------------

/// Parameters for search_keyword.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchKeywordParams {
    /// Regex or literal to scan for.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub top_k: Option<usize>,
}

/// Parameters for get_file.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetFileParams {
    /// File path relative to the repository root.
    pub path: String,
    /// First line to include (1-indexed, inclusive).
    pub start: Option<u32>,
    /// Last line to include (1-indexed, inclusive).
    pub end: Option<u32>,
}

/// Parameters for find_symbol.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FindSymbolParams {
    /// Symbol name or name fragment.
    pub name: String,
    /// Restrict to one kind (function, struct, class, ...).
    pub kind: Option<String>,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
}

/// Parameters for list_defs_in_file.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListDefsParams {
    /// File path relative to the repository root.
    pub path: String,
}

/// Parameters for search_semantic and hybrid_search.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchParams {
    /// Natural-language or code query.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub top_k: Option<usize>,
}

// -----------------------------------------------------------------------
// MCP server
// -----------------------------------------------------------------------

/// codetect MCP server, exposing the search tools to AI agents.
#[derive(Clone)]
pub struct CodetectServer {
    engine: Arc<Engine>,
    tools: Arc<SemanticTools>,
    tool_router: ToolRouter<Self>,
}

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string(&value)
        .map_err(|e| McpError::internal_error(format!("serialization failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_router]
impl CodetectServer {
    /// Create a server backed by the given engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            tools: Arc::new(SemanticTools::new(engine.clone())),
            engine,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search_keyword",
        description = "Regex keyword scan over the repository. Returns matching lines with file paths and line numbers."
    )]
    async fn search_keyword(
        &self,
        params: Parameters<SearchKeywordParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = params.0.top_k.unwrap_or(DEFAULT_TOP_K);
        match self.engine.search_keyword(&params.0.query, top_k) {
            Ok(hits) => json_result(serde_json::json!({
                "results": hits.iter().map(|h| serde_json::json!({
                    "path": h.path,
                    "line": h.line,
                    "snippet": h.snippet,
                })).collect::<Vec<_>>(),
            })),
            Err(e) => Err(McpError::internal_error(format!("keyword scan failed: {e}"), None)),
        }
    }

    #[tool(
        name = "get_file",
        description = "Read a file from the repository, optionally restricted to a 1-indexed inclusive line range."
    )]
    async fn get_file(
        &self,
        params: Parameters<GetFileParams>,
    ) -> Result<CallToolResult, McpError> {
        match self
            .engine
            .get_file(&params.0.path, params.0.start, params.0.end)
        {
            Ok(content) => json_result(serde_json::json!({ "content": content })),
            Err(e) => Err(McpError::invalid_params(format!("get_file failed: {e}"), None)),
        }
    }

    #[tool(
        name = "find_symbol",
        description = "Look up symbols by name. Exact matches rank first, then prefix matches, then other substring matches."
    )]
    async fn find_symbol(
        &self,
        params: Parameters<FindSymbolParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.0.limit.unwrap_or(DEFAULT_TOP_K);
        match self
            .engine
            .find_symbol(&params.0.name, params.0.kind.as_deref(), limit)
            .await
        {
            Ok(symbols) => json_result(serde_json::json!({
                "symbols": symbols.iter().map(|s| serde_json::json!({
                    "name": s.name,
                    "kind": s.kind,
                    "path": s.path,
                    "line": s.line,
                    "scope": s.scope,
                })).collect::<Vec<_>>(),
            })),
            Err(e) => Err(McpError::internal_error(format!("symbol lookup failed: {e}"), None)),
        }
    }

    #[tool(
        name = "list_defs_in_file",
        description = "List every symbol defined in one file, ordered by line."
    )]
    async fn list_defs_in_file(
        &self,
        params: Parameters<ListDefsParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.engine.list_defs_in_file(&params.0.path).await {
            Ok(symbols) => json_result(serde_json::json!({
                "symbols": symbols.iter().map(|s| serde_json::json!({
                    "name": s.name,
                    "kind": s.kind,
                    "line": s.line,
                })).collect::<Vec<_>>(),
            })),
            Err(e) => Err(McpError::internal_error(format!("list defs failed: {e}"), None)),
        }
    }

    #[tool(
        name = "search_semantic",
        description = "Vector semantic search over indexed code chunks. Answers {available: false} when no embedding provider is serving."
    )]
    async fn search_semantic(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = params.0.top_k.unwrap_or(DEFAULT_TOP_K);
        match self.tools.search_semantic(&params.0.query, top_k).await {
            Ok(response) => json_result(serde_json::json!({
                "available": response.available,
                "results": response.results,
            })),
            Err(e) => Err(McpError::internal_error(format!("semantic search failed: {e}"), None)),
        }
    }

    #[tool(
        name = "hybrid_search",
        description = "Fused keyword + symbol + semantic search. Each result lists which sources contributed."
    )]
    async fn hybrid_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let top_k = params.0.top_k.unwrap_or(DEFAULT_TOP_K);
        match self.tools.hybrid_search(&params.0.query, top_k).await {
            Ok(hits) => json_result(serde_json::json!({ "results": hits })),
            Err(e) => Err(McpError::internal_error(format!("hybrid search failed: {e}"), None)),
        }
    }
}

#[tool_handler]
impl ServerHandler for CodetectServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "codetect locates relevant source lines in this repository. \
                 Use search_keyword for exact strings and regexes, find_symbol for \
                 definitions by name, search_semantic for natural-language queries, \
                 and hybrid_search when unsure. get_file reads the surrounding code."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}
