/// Neural network layer primitives
///
/// Building blocks of the encoder classifier:
/// - Embeddings (token + learned position, normalized)
/// - Multi-head self-attention with padding masks
/// - Position-wise feed-forward network (GELU)

pub mod attention;
pub mod embeddings;
pub mod feed_forward;

pub use attention::{attention_bias, SelfAttention};
pub use embeddings::EncoderEmbeddings;
pub use feed_forward::FeedForward;
