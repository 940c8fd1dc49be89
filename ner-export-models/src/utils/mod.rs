pub mod attn_mask;
pub mod var_builder;
