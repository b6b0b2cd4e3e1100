mod cancellation;
mod early_exit;
mod error_attribution;
mod even_sum;
mod pipeline_file;
mod process_stages;
mod template_reuse;
