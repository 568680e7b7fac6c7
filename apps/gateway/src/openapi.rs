use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::jobs::submit_job,
        crate::api::jobs::get_job,
        crate::api::jobs::list_jobs,
        crate::api::jobs::job_progress,
        crate::api::cleanup::cleanup,
    ),
    components(schemas(
        axum_helpers::ErrorResponse,
        broker::JobStatus,
        broker::Job,
        broker::JobRequirements,
        broker::JobSubmission,
        crate::api::jobs::SubmitJobResponse,
        crate::api::jobs::GetJobResponse,
        crate::api::jobs::ListJobsResponse,
        crate::api::cleanup::CleanupRequestBody,
    )),
    info(
        title = "Job Orchestrator Gateway",
        version = "0.1.0",
        description = "Admission, query, and progress-streaming surface for the distributed job-queue orchestrator"
    ),
    servers(
        (url = "/api", description = "API base path")
    )
)]
pub struct ApiDoc;
