mod client;

pub use client::{
    CanvasClient, CanvasError, Course, CourseProgress, CourseStatus, File, Folder, Profile, Quota,
};
