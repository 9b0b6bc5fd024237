pub mod shared {
    pub mod constants;
    pub mod frame;
}

pub mod config {
    pub mod pipeline_config;
}

pub mod capture {
    pub mod domain {
        pub mod frame_source;
    }
    pub mod infrastructure {
        pub mod image_file_source;
    }
}

pub mod detection {
    pub mod domain {
        pub mod confirmed_detection;
        pub mod detection_cache;
        pub mod detection_classifier;
        pub mod inference_engine;
        pub mod temporal_deduplicator;
    }
    pub mod infrastructure;
}

pub mod cart {
    pub mod domain {
        pub mod cart;
        pub mod cart_mutation_sink;
        pub mod cart_reconciler;
        pub mod product_catalog;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod detection_pipeline;
    pub mod detection_session;
    pub mod pipeline_logger;
    pub mod retry_governor;
}
