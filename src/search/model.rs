use crate::core::config::Config;
use crate::core::error::{Error, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::Api;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Default embedding model (small, strong, good for semantic search)
/// https://huggingface.co/BAAI/bge-small-en-v1.5
pub const DEFAULT_MODEL: &str = "BAAI/bge-small-en-v1.5";

/// Instruction BGE models expect in front of short retrieval queries
const QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

/// Windows embedded per forward pass
const BATCH_SIZE: usize = 16;

const MODEL_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

/// Turns text into fixed-dimension vectors
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model; changing it invalidates stored vectors
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed a document. Long text is split into several chunks, one vector each,
    /// in document order. Text without content yields no vectors.
    fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query into a single vector
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Query produced no embedding".to_string()))
    }
}

/// Shape parameters read from the model's config.json
#[derive(Debug, Deserialize)]
struct ModelShape {
    hidden_size: usize,
    max_position_embeddings: usize,
}

/// BERT embedder running on candle
pub struct BertEmbedder {
    model: Mutex<BertModel>,
    tokenizer: Mutex<Tokenizer>,
    device: Device,
    dimension: usize,
    /// Tokens per window, excluding [CLS] and [SEP]
    window: usize,
    cls_id: u32,
    sep_id: u32,
    pad_id: u32,
}

impl BertEmbedder {
    /// Load the model from the models directory, downloading it first if needed
    pub fn init(config: &Config) -> Result<Self> {
        if !Self::is_downloaded(config) {
            Self::download(config)?;
        }
        Self::load(&config.models_dir)
    }

    pub fn is_downloaded(config: &Config) -> bool {
        MODEL_FILES
            .iter()
            .all(|name| config.models_dir.join(name).exists())
    }

    /// Download model files from HuggingFace Hub into the models directory
    pub fn download(config: &Config) -> Result<()> {
        std::fs::create_dir_all(&config.models_dir)?;
        tracing::info!("Downloading embedding model {}", DEFAULT_MODEL);

        let api = Api::new()?;
        let repo = api.model(DEFAULT_MODEL.to_string());
        for name in MODEL_FILES {
            tracing::info!("  fetching {}", name);
            let cached = repo.get(name)?;
            std::fs::copy(&cached, config.models_dir.join(name))?;
        }

        tracing::info!("Model downloaded to {}", config.models_dir.display());
        Ok(())
    }

    /// Load model files from disk
    pub fn load(models_dir: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(models_dir.join("config.json"))?;
        let bert_config: BertConfig = serde_json::from_str(&config_content)
            .map_err(|e| Error::Model(format!("Failed to parse config: {}", e)))?;
        let shape: ModelShape = serde_json::from_str(&config_content)
            .map_err(|e| Error::Model(format!("Failed to parse config: {}", e)))?;
        if shape.max_position_embeddings <= 2 {
            return Err(Error::Model(format!(
                "Unusable max_position_embeddings: {}",
                shape.max_position_embeddings
            )));
        }

        let tokenizer = Tokenizer::from_file(models_dir.join("tokenizer.json"))
            .map_err(|e| Error::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;
        let special = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| Error::Tokenizer(format!("Tokenizer has no {} token", token)))
        };
        let cls_id = special("[CLS]")?;
        let sep_id = special("[SEP]")?;
        let pad_id = tokenizer.get_padding().map(|p| p.pad_id).unwrap_or(0);

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

        // Load model weights using memory mapping
        let weights = models_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DTYPE, &device)
                .map_err(|e| Error::Model(format!("Failed to load weights: {}", e)))?
        };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| Error::Model(format!("Failed to load model: {}", e)))?;

        tracing::debug!(
            "Loaded {} (dimension {}, {} tokens per window)",
            DEFAULT_MODEL,
            shape.hidden_size,
            shape.max_position_embeddings - 2
        );

        Ok(Self {
            model: Mutex::new(model),
            tokenizer: Mutex::new(tokenizer),
            device,
            dimension: shape.hidden_size,
            window: shape.max_position_embeddings - 2,
            cls_id,
            sep_id,
            pad_id,
        })
    }

    /// Token windows of the text, each wrapped in [CLS] ... [SEP]
    fn windows(&self, text: &str) -> Result<Vec<Vec<u32>>> {
        let tokenizer = self
            .tokenizer
            .lock()
            .map_err(|e| Error::Model(format!("Failed to lock tokenizer: {}", e)))?;
        let encoding = tokenizer
            .encode(text, false)
            .map_err(|e| Error::Tokenizer(format!("Tokenization failed: {}", e)))?;

        Ok(split_windows(encoding.get_ids(), self.window, self.cls_id, self.sep_id))
    }

    fn forward(&self, windows: &[Vec<u32>]) -> Result<Vec<Vec<f32>>> {
        let longest = windows.iter().map(Vec::len).max().unwrap_or(0);
        let token_ids = windows
            .iter()
            .map(|ids| {
                let mut padded = ids.clone();
                padded.resize(longest, self.pad_id);
                Tensor::new(padded.as_slice(), &self.device).map_err(Error::Candle)
            })
            .collect::<Result<Vec<Tensor>>>()?;
        let token_ids = Tensor::stack(&token_ids, 0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let model = self
            .model
            .lock()
            .map_err(|e| Error::Model(format!("Failed to lock model: {}", e)))?;
        let embeddings = model.forward(&token_ids, &token_type_ids)?;

        // CLS pooling: [batch, seq, hidden] -> [batch, hidden]
        let pooled = embeddings.narrow(1, 0, 1)?.squeeze(1)?;
        let normalized = normalize_l2(&pooled)?;

        let (rows, _) = normalized.dims2()?;
        let mut result = Vec::with_capacity(rows);
        for i in 0..rows {
            result.push(normalized.get(i)?.to_vec1()?);
        }
        Ok(result)
    }
}

impl Embedder for BertEmbedder {
    fn model_id(&self) -> &str {
        DEFAULT_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let windows = self.windows(text)?;
        let mut vectors = Vec::with_capacity(windows.len());
        for batch in windows.chunks(BATCH_SIZE) {
            vectors.extend(self.forward(batch)?);
        }
        Ok(vectors)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let windows = self.windows(&format!("{}{}", QUERY_INSTRUCTION, text))?;
        let first = windows
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Query produced no embedding".to_string()))?;
        self.forward(&[first])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Query produced no embedding".to_string()))
    }
}

/// Cut token ids into windows of `window` tokens plus the special tokens
fn split_windows(ids: &[u32], window: usize, cls_id: u32, sep_id: u32) -> Vec<Vec<u32>> {
    ids.chunks(window.max(1))
        .map(|chunk| {
            let mut ids = Vec::with_capacity(chunk.len() + 2);
            ids.push(cls_id);
            ids.extend_from_slice(chunk);
            ids.push(sep_id);
            ids
        })
        .collect()
}

fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    Ok(v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)?)
}

/// Deterministic embedder for tests: every non-empty line is one vector of
/// whitespace-separated floats. A line reading `fail` makes embedding fail.
#[cfg(test)]
pub(crate) struct LineEmbedder {
    pub dimension: usize,
}

#[cfg(test)]
impl Embedder for LineEmbedder {
    fn model_id(&self) -> &str {
        "line-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                if line == "fail" {
                    return Err(Error::Embedding("requested failure".to_string()));
                }
                line.split_whitespace()
                    .map(|x| {
                        x.parse::<f32>()
                            .map_err(|e| Error::Embedding(format!("bad component {:?}: {}", x, e)))
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_embedder() {
        let embedder = LineEmbedder { dimension: 2 };
        let vectors = embedder.embed("1 0\n\n0.5 2\n").unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 2.0]]);
        assert!(embedder.embed("").unwrap().is_empty());
        assert!(embedder.embed("fail").is_err());
    }

    #[test]
    fn test_embed_query_uses_first_vector() {
        let embedder = LineEmbedder { dimension: 2 };
        assert_eq!(embedder.embed_query("3 4\n5 6").unwrap(), vec![3.0, 4.0]);
        assert!(matches!(embedder.embed_query("  "), Err(Error::Embedding(_))));
    }

    #[test]
    fn test_split_windows() {
        let windows = split_windows(&[10, 11, 12, 13, 14], 2, 101, 102);
        assert_eq!(
            windows,
            vec![
                vec![101, 10, 11, 102],
                vec![101, 12, 13, 102],
                vec![101, 14, 102],
            ]
        );
        assert!(split_windows(&[], 2, 101, 102).is_empty());
    }

    #[test]
    fn test_normalize_l2() {
        let t = Tensor::new(&[[3.0f32, 4.0], [0.0, 2.0]], &Device::Cpu).unwrap();
        let n = normalize_l2(&t).unwrap().to_vec2::<f32>().unwrap();
        assert!((n[0][0] - 0.6).abs() < 1e-6);
        assert!((n[0][1] - 0.8).abs() < 1e-6);
        assert!((n[1][1] - 1.0).abs() < 1e-6);
    }
}
