//! Job specification (node graph) construction

use serde_json::{json, Value};

use crate::config::WorkflowConfig;

/// Parameters embedded into one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams<'a> {
    pub prompt: &'a str,
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    pub steps: u32,
}

/// Build the text-to-image graph submitted to the job queue.
///
/// Node ids are stable; the save node ("9") is the one whose images are read back.
pub fn build_workflow(params: &JobParams<'_>, config: &WorkflowConfig) -> Value {
    json!({
        "6": {
            "inputs": {"text": params.prompt, "clip": ["38", 0]},
            "class_type": "CLIPTextEncode",
            "_meta": {"title": "CLIP Text Encode (Positive Prompt)"}
        },
        "8": {
            "inputs": {"samples": ["31", 0], "vae": ["39", 0]},
            "class_type": "VAEDecode",
            "_meta": {"title": "VAE Decode"}
        },
        "9": {
            "inputs": {"images": ["8", 0], "filename_prefix": config.filename_prefix},
            "class_type": "SaveImage",
            "_meta": {"title": "Save Image"}
        },
        "27": {
            "inputs": {"width": params.width, "height": params.height, "batch_size": 1},
            "class_type": "EmptySD3LatentImage",
            "_meta": {"title": "EmptySD3LatentImage"}
        },
        "31": {
            "inputs": {
                "seed": params.seed,
                "steps": params.steps,
                "cfg": config.cfg,
                "sampler_name": config.sampler_name,
                "scheduler": config.scheduler,
                "denoise": 1,
                "model": ["37", 0],
                "positive": ["6", 0],
                "negative": ["33", 0],
                "latent_image": ["27", 0]
            },
            "class_type": "KSampler",
            "_meta": {"title": "KSampler"}
        },
        "33": {
            "inputs": {"text": "", "clip": ["38", 0]},
            "class_type": "CLIPTextEncode",
            "_meta": {"title": "CLIP Text Encode (Negative Prompt)"}
        },
        "37": {
            "inputs": {"unet_name": config.unet_name, "weight_dtype": config.weight_dtype},
            "class_type": "UNETLoader",
            "_meta": {"title": "Load Diffusion Model"}
        },
        "38": {
            "inputs": {
                "clip_name1": config.clip_name1,
                "clip_name2": config.clip_name2,
                "type": config.clip_type
            },
            "class_type": "DualCLIPLoader",
            "_meta": {"title": "DualCLIPLoader"}
        },
        "39": {
            "inputs": {"vae_name": config.vae_name},
            "class_type": "VAELoader",
            "_meta": {"title": "Load VAE"}
        }
    })
}
