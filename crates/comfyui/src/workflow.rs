//! Workflow templates: ComfyUI API-format graphs plus node bindings.
//!
//! A template is the JSON exported with "Save (API format)": an object
//! keyed by node id whose values carry an `inputs` map. Which node input
//! receives the prompt, resolution, frame count and source image is
//! declared in a sibling `<stem>.bindings.json` file:
//!
//! ```json
//! {
//!   "prompt": {"node": "6", "field": "text"},
//!   "width":  {"node": "50", "field": "width"},
//!   "height": {"node": "50", "field": "height"},
//!   "frames": {"node": "50", "field": "length"},
//!   "image":  {"node": "52", "field": "image"}
//! }
//! ```
//!
//! Every binding is checked when the template is loaded, so a template
//! that drifts from its bindings fails at startup instead of mid-request.

use std::path::{Path, PathBuf};

use mediabot_core::types::Resolution;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Address of one node input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub node: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
        }
    }
}

/// Where the per-request values go inside a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBindings {
    pub prompt: FieldRef,
    pub width: FieldRef,
    pub height: FieldRef,
    /// Frame count; absent for still-image templates.
    #[serde(default)]
    pub frames: Option<FieldRef>,
    /// Load-image node; absent for text-only templates.
    #[serde(default)]
    pub image: Option<FieldRef>,
}

impl NodeBindings {
    fn named(&self) -> Vec<(&'static str, &FieldRef)> {
        let mut all = vec![
            ("prompt", &self.prompt),
            ("width", &self.width),
            ("height", &self.height),
        ];
        if let Some(frames) = &self.frames {
            all.push(("frames", frames));
        }
        if let Some(image) = &self.image {
            all.push(("image", image));
        }
        all
    }
}

/// Errors raised while loading or rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow '{0}' is not a JSON object keyed by node id")]
    NotAnObject(String),

    #[error("Workflow '{template}' has no node '{node}' (bound as {binding})")]
    MissingNode {
        template: String,
        node: String,
        binding: &'static str,
    },

    #[error("Workflow '{template}' node '{node}' has no input '{field}' (bound as {binding})")]
    MissingField {
        template: String,
        node: String,
        field: String,
        binding: &'static str,
    },

    #[error("Workflow '{template}' has no {binding} binding")]
    Unbound {
        template: String,
        binding: &'static str,
    },
}

/// Values written into a template for one submission.
#[derive(Debug, Clone)]
pub struct RenderParams<'a> {
    pub prompt: &'a str,
    pub resolution: Resolution,
    pub frames: Option<u32>,
    /// File name as ComfyUI sees it inside its input directory.
    pub image: Option<&'a str>,
}

/// A validated workflow graph with its bindings.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    name: String,
    graph: Map<String, Value>,
    bindings: NodeBindings,
}

impl WorkflowTemplate {
    /// Load `path` and its sibling `<stem>.bindings.json`.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let graph: Value = read_json(path)?;
        let bindings: NodeBindings = read_json(&bindings_path(path))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let template = Self::from_parts(name, graph, bindings)?;
        tracing::info!(
            template = %template.name,
            nodes = template.graph.len(),
            "Loaded workflow template",
        );
        Ok(template)
    }

    /// Build a template from an in-memory graph, validating every binding.
    pub fn from_parts(
        name: impl Into<String>,
        graph: Value,
        bindings: NodeBindings,
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        let graph = match graph {
            Value::Object(map) => map,
            _ => return Err(TemplateError::NotAnObject(name)),
        };

        for (binding, field_ref) in bindings.named() {
            let inputs = graph
                .get(&field_ref.node)
                .ok_or_else(|| TemplateError::MissingNode {
                    template: name.clone(),
                    node: field_ref.node.clone(),
                    binding,
                })?
                .get("inputs")
                .and_then(Value::as_object);

            let has_field = inputs.is_some_and(|i| i.contains_key(&field_ref.field));
            if !has_field {
                return Err(TemplateError::MissingField {
                    template: name.clone(),
                    node: field_ref.node.clone(),
                    field: field_ref.field.clone(),
                    binding,
                });
            }
        }

        Ok(Self {
            name,
            graph,
            bindings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &NodeBindings {
        &self.bindings
    }

    /// Whether this template takes a frame count (i.e. produces video).
    pub fn takes_frames(&self) -> bool {
        self.bindings.frames.is_some()
    }

    pub fn takes_image(&self) -> bool {
        self.bindings.image.is_some()
    }

    /// Produce a submission-ready graph with the request values written in.
    pub fn render(&self, params: &RenderParams<'_>) -> Result<Value, TemplateError> {
        let mut graph = self.graph.clone();

        self.set(&mut graph, &self.bindings.prompt, "prompt", Value::from(params.prompt))?;
        self.set(
            &mut graph,
            &self.bindings.width,
            "width",
            Value::from(params.resolution.width),
        )?;
        self.set(
            &mut graph,
            &self.bindings.height,
            "height",
            Value::from(params.resolution.height),
        )?;

        if let Some(frames) = params.frames {
            let field_ref = self.required(&self.bindings.frames, "frames")?;
            self.set(&mut graph, field_ref, "frames", Value::from(frames))?;
        }

        if let Some(image) = params.image {
            let field_ref = self.required(&self.bindings.image, "image")?;
            self.set(&mut graph, field_ref, "image", Value::from(image))?;
        }

        Ok(Value::Object(graph))
    }

    fn required<'b>(
        &self,
        field_ref: &'b Option<FieldRef>,
        binding: &'static str,
    ) -> Result<&'b FieldRef, TemplateError> {
        field_ref.as_ref().ok_or_else(|| TemplateError::Unbound {
            template: self.name.clone(),
            binding,
        })
    }

    fn set(
        &self,
        graph: &mut Map<String, Value>,
        field_ref: &FieldRef,
        binding: &'static str,
        value: Value,
    ) -> Result<(), TemplateError> {
        let slot = graph
            .get_mut(&field_ref.node)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(|inputs| inputs.get_mut(&field_ref.field))
            .ok_or_else(|| TemplateError::MissingField {
                template: self.name.clone(),
                node: field_ref.node.clone(),
                field: field_ref.field.clone(),
                binding,
            })?;
        *slot = value;
        Ok(())
    }
}

/// `foo.json` -> `foo.bindings.json`.
pub fn bindings_path(template_path: &Path) -> PathBuf {
    template_path.with_extension("bindings.json")
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, TemplateError> {
    let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| TemplateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
