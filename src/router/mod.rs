pub mod exception_router;
