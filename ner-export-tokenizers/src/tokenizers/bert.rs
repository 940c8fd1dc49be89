use ner_export::{Error, Result};
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::bpe::Vocab;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::template::TemplateProcessing;
use tokenizers::{
    AddedToken, PaddingDirection, Tokenizer as CoreTokenizer,
    TokenizerBuilder as CoreTokenizerBuilder,
};

use crate::config::TokenizerConfig;
use crate::from_pretrained::{SpecialTokenName, TokenizerInfo};
use crate::impl_tokenizer;
use crate::tokenizer::{Tokenizer, TokenizerBuilder};

const BERT_MAX_LENGTH: usize = 512;
const BERT_CLS_TOKEN: &str = "[CLS]";
const BERT_MASK_TOKEN: &str = "[MASK]";
const BERT_PAD_TOKEN: &str = "[PAD]";
const BERT_SEP_TOKEN: &str = "[SEP]";
const BERT_UNK_TOKEN: &str = "[UNK]";

/// BertTokenizer
#[derive(Debug)]
pub struct BertTokenizer {
    tokenizer: CoreTokenizer,
    config: TokenizerConfig,
    padding_side: PaddingDirection,
    max_length: usize,
    cls_token: Option<String>,
    mask_token: Option<String>,
    pad_token: Option<String>,
    sep_token: Option<String>,
    unk_token: Option<String>,
}

impl_tokenizer!(BertTokenizer, "BertTokenizer");

/// `BertTokenizer` builder.
pub struct BertTokenizerBuilder {
    tokenizer_info: TokenizerInfo,
}

impl BertTokenizerBuilder {
    fn special_token(&self, name: SpecialTokenName, default: &str) -> String {
        self.tokenizer_info
            .get_special_token(name)
            .unwrap_or_else(|| default.to_string())
    }

    fn build_normalizer(&self, config: &TokenizerConfig) -> BertNormalizer {
        BertNormalizer::new(
            true,
            config.tokenize_chinese_chars.unwrap_or(true),
            config.strip_accents,
            config.do_lower_case.unwrap_or(true),
        )
    }

    fn build_model(&self, vocab: Vocab, unk_token: String) -> Result<WordPiece> {
        WordPiece::builder()
            .vocab(vocab)
            .unk_token(unk_token)
            .continuing_subword_prefix("##".to_string())
            .max_input_chars_per_word(100)
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))
    }

    fn build_post_processor(
        &self,
        sep_token: (String, u32),
        cls_token: (String, u32),
    ) -> Result<TemplateProcessing> {
        TemplateProcessing::builder()
            .try_single(format!("{} $A {}", cls_token.0, sep_token.0))
            .map_err(Error::TokenizerBuildError)?
            .try_pair(format!(
                "{} $A:0 {} $B:1 {}:1",
                cls_token.0, sep_token.0, sep_token.0
            ))
            .map_err(Error::TokenizerBuildError)?
            .special_tokens(vec![cls_token, sep_token])
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))
    }
}

impl TokenizerBuilder<BertTokenizer> for BertTokenizerBuilder {
    fn new(tokenizer_info: TokenizerInfo) -> Self {
        BertTokenizerBuilder { tokenizer_info }
    }

    fn get_tokenizer_info(&self) -> &TokenizerInfo {
        &self.tokenizer_info
    }

    fn build_tokenizer(&mut self) -> Result<CoreTokenizer> {
        let tokenizer_config = self
            .tokenizer_info
            .config
            .as_ref()
            .ok_or(Error::TokenizerMissingConfig)?;
        let normalizer = self.build_normalizer(tokenizer_config);

        let cls_token = self.special_token(SpecialTokenName::Cls, BERT_CLS_TOKEN);
        let sep_token = self.special_token(SpecialTokenName::Sep, BERT_SEP_TOKEN);
        let unk_token = self.special_token(SpecialTokenName::Unk, BERT_UNK_TOKEN);
        let special_tokens: Vec<AddedToken> = [
            cls_token.clone(),
            self.special_token(SpecialTokenName::Mask, BERT_MASK_TOKEN),
            self.special_token(SpecialTokenName::Pad, BERT_PAD_TOKEN),
            sep_token.clone(),
            unk_token.clone(),
        ]
        .into_iter()
        .map(|token| AddedToken::from(token, true))
        .collect();

        let vocab = self.tokenizer_info.vocab.take().ok_or_else(|| {
            Error::TokenizerBuildError("Cannot build BertTokenizer without 'vocab.txt'.".to_string())
        })?;
        let cls_token_id = *vocab
            .get(&cls_token)
            .ok_or_else(|| Error::MissingSpecialTokenId(cls_token.clone()))?;
        let sep_token_id = *vocab
            .get(&sep_token)
            .ok_or_else(|| Error::MissingSpecialTokenId(sep_token.clone()))?;

        let post_processor =
            self.build_post_processor((sep_token, sep_token_id), (cls_token, cls_token_id))?;

        let mut tokenizer: CoreTokenizer = CoreTokenizerBuilder::new()
            .with_model(self.build_model(vocab, unk_token)?)
            .with_normalizer(Some(normalizer))
            .with_pre_tokenizer(Some(BertPreTokenizer))
            .with_post_processor(Some(post_processor))
            .with_decoder(Some(WordPieceDecoder::new("##".to_string(), true)))
            .build()
            .map_err(|e| Error::TokenizerBuildError(e.to_string()))?
            .into();
        tokenizer.add_special_tokens(&special_tokens);

        Ok(tokenizer)
    }

    fn build_with_tokenizer(&self, tokenizer: CoreTokenizer) -> Result<BertTokenizer> {
        let config = self.tokenizer_info.get_config().cloned().unwrap_or_default();
        let max_length = config.model_max_length.unwrap_or(BERT_MAX_LENGTH);

        Ok(BertTokenizer {
            tokenizer,
            config,
            padding_side: PaddingDirection::Right,
            max_length,
            cls_token: Some(self.special_token(SpecialTokenName::Cls, BERT_CLS_TOKEN)),
            mask_token: Some(self.special_token(SpecialTokenName::Mask, BERT_MASK_TOKEN)),
            pad_token: Some(self.special_token(SpecialTokenName::Pad, BERT_PAD_TOKEN)),
            sep_token: Some(self.special_token(SpecialTokenName::Sep, BERT_SEP_TOKEN)),
            unk_token: Some(self.special_token(SpecialTokenName::Unk, BERT_UNK_TOKEN)),
        })
    }
}
