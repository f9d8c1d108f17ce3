use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{embedding, Dropout, Embedding, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

/// Transformer embeddings configuration.
#[derive(Clone, Debug)]
pub struct TransformerEmbeddingsConfig {
    dropout: f32,
    embedding_width: usize,
    n_pieces: usize,
    n_positions: usize,
}

impl TransformerEmbeddingsConfig {
    /// Dropout probability applied to the summed embeddings.
    ///
    /// Default: `0.0`
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the embeddings.
    ///
    /// Default: `256`
    pub fn embedding_width(mut self, embedding_width: usize) -> Self {
        self.embedding_width = embedding_width;
        self
    }

    /// Size of the piece vocabulary.
    ///
    /// Default: `1000`
    pub fn n_pieces(mut self, n_pieces: usize) -> Self {
        self.n_pieces = n_pieces;
        self
    }

    /// Maximum sequence length supported by the position embeddings.
    ///
    /// Default: `100`
    pub fn n_positions(mut self, n_positions: usize) -> Self {
        self.n_positions = n_positions;
        self
    }

    /// Build an embeddings layer.
    pub fn build(&self, vb: VarBuilder) -> Result<TransformerEmbeddings, TransformerEmbeddingsError> {
        let piece_embeddings = embedding(
            self.n_pieces,
            self.embedding_width,
            vb.push_prefix("piece_embeddings"),
        )
        .context(ConstructionSnafu)?;

        let position_embeddings = embedding(
            self.n_positions,
            self.embedding_width,
            vb.push_prefix("position_embeddings"),
        )
        .context(ConstructionSnafu)?;

        Ok(TransformerEmbeddings {
            dropout: Dropout::new(self.dropout),
            n_positions: self.n_positions,
            piece_embeddings,
            position_embeddings,
        })
    }
}

impl Default for TransformerEmbeddingsConfig {
    fn default() -> Self {
        Self {
            dropout: 0.0,
            embedding_width: 256,
            n_pieces: 1000,
            n_positions: 100,
        }
    }
}

/// Errors for transformer embeddings.
#[derive(Debug, Snafu)]
pub enum TransformerEmbeddingsError {
    #[snafu(display("Cannot construct embeddings layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Cannot lookup piece embeddings"))]
    PieceEmbeddings { source: candle_core::Error },

    #[snafu(display("Cannot lookup position embeddings"))]
    PositionEmbeddings { source: candle_core::Error },

    #[snafu(display("Sequence length {seq_len} exceeds the maximum length {n_positions}"))]
    SequenceLength { n_positions: usize, seq_len: usize },
}

/// Transformer embeddings layer.
///
/// Looks up learned piece embeddings, adds learned position embeddings for
/// the positions _[0..seq_len)_, and applies dropout.
pub struct TransformerEmbeddings {
    dropout: Dropout,
    n_positions: usize,
    piece_embeddings: Embedding,
    position_embeddings: Embedding,
}

impl TransformerEmbeddings {
    /// Get position identifiers _[0..seq_len)_.
    fn get_positions(x: &Tensor) -> Result<Tensor, TransformerEmbeddingsError> {
        let (_, seq_len) = x.shape().dims2().context(PositionEmbeddingsSnafu)?;
        Tensor::arange(0, seq_len as i64, x.device())
            .and_then(|xs| xs.reshape((1, seq_len)))
            .context(PositionEmbeddingsSnafu)
    }

    /// Calculate the piece embeddings.
    ///
    /// * `piece_ids` - Input sequence.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether the model is trained.
    ///
    /// Returns: Embedded input sequence.
    /// *Shape:* `(batch_size, seq_len, embedding_width)`
    pub fn forward(
        &self,
        piece_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor, TransformerEmbeddingsError> {
        let (_, seq_len) = piece_ids.shape().dims2().context(PieceEmbeddingsSnafu)?;
        ensure!(
            seq_len <= self.n_positions,
            SequenceLengthSnafu {
                n_positions: self.n_positions,
                seq_len,
            }
        );

        let embeddings = self
            .piece_embeddings
            .forward(piece_ids)
            .context(PieceEmbeddingsSnafu)?;

        let positions = Self::get_positions(piece_ids)?;
        let embeddings = self
            .position_embeddings
            .forward(&positions)
            .and_then(|xs| embeddings.broadcast_add(&xs))
            .context(PositionEmbeddingsSnafu)?;

        self.dropout
            .forward_t(&embeddings, train)
            .context(DropoutSnafu)
    }
}
