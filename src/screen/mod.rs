pub mod classifier;
pub mod ocr;
pub mod preprocess;
pub mod reader;
pub mod waiter;

pub use classifier::{
    classify, classify_courses, classify_family, CourseResult, OperationFamily, Outcome, Outcomes,
    RejectionCode,
};
pub use ocr::{OcrEngine, OcrError, TesseractOcr};
pub use reader::{
    ClientRect, OverlayControl, ScreenConfig, ScreenReader, ScreenSnapshot, ScreenSource,
    WindowCapturer, WindowHandle,
};
pub use waiter::{PromptState, ResponseWaiter, WaitConfig, WaitResult};
