use ash::vk::{self, Handle};
use log::{error, info};
use openxr::{self as xr, EventDataBuffer, FrameStream, FrameWaiter, Session, Space, Swapchain};
use xr::{ReferenceSpaceType, SwapchainCreateFlags, SwapchainUsageFlags};

use super::{SwapchainHandle, WaitStatus, XrRuntime};
use crate::{rendering::LayerView, KiError, KiResult, API_VERSION, BLEND_MODE, VIEW_TYPE};

/// `GL_SRGB8_ALPHA8`
const GL_SRGB8_ALPHA8: u32 = 0x8C43;

/// The graphics APIs an [`OpenXrRuntime`] can bind a session to.
pub trait GraphicsBinding: xr::Graphics {
    /// The image handle the renderer binds as a render target
    type Image: Copy + std::fmt::Debug;

    /// Whether the runtime offers the interop extension for this API
    fn extension_available(available: &xr::ExtensionSet) -> bool;

    /// Enable the interop extension for this API
    fn enable_extension(extensions: &mut xr::ExtensionSet);

    /// Query (and log) the API versions the runtime can work with. The query is mandatory
    /// before a session may be created.
    fn check_requirements(instance: &xr::Instance, system: xr::SystemId) -> xr::Result<()>;

    /// 8 bits per channel sRGB, the color format every runtime supports
    fn srgb_color_format() -> Self::Format;

    /// Turn a raw swapchain image into the API's handle type
    fn wrap_image(raw: Self::SwapchainImage) -> Self::Image;
}

fn version_string(version: xr::Version) -> String {
    format!(
        "{}.{}.{}",
        version.major(),
        version.minor(),
        version.patch()
    )
}

impl GraphicsBinding for xr::OpenGL {
    type Image = u32;

    fn extension_available(available: &xr::ExtensionSet) -> bool {
        available.khr_opengl_enable
    }

    fn enable_extension(extensions: &mut xr::ExtensionSet) {
        extensions.khr_opengl_enable = true;
    }

    fn check_requirements(instance: &xr::Instance, system: xr::SystemId) -> xr::Result<()> {
        let requirements = instance.graphics_requirements::<xr::OpenGL>(system)?;
        info!(
            "[KI_XR] OpenGL versions supported by the runtime: {} - {}",
            version_string(requirements.min_api_version_supported),
            version_string(requirements.max_api_version_supported)
        );
        Ok(())
    }

    fn srgb_color_format() -> u32 {
        GL_SRGB8_ALPHA8
    }

    fn wrap_image(raw: u32) -> u32 {
        raw
    }
}

impl GraphicsBinding for xr::Vulkan {
    type Image = vk::Image;

    fn extension_available(available: &xr::ExtensionSet) -> bool {
        available.khr_vulkan_enable
    }

    fn enable_extension(extensions: &mut xr::ExtensionSet) {
        extensions.khr_vulkan_enable = true;
    }

    fn check_requirements(instance: &xr::Instance, system: xr::SystemId) -> xr::Result<()> {
        let requirements = instance.graphics_requirements::<xr::Vulkan>(system)?;
        info!(
            "[KI_XR] Vulkan versions supported by the runtime: {} - {}",
            version_string(requirements.min_api_version_supported),
            version_string(requirements.max_api_version_supported)
        );
        Ok(())
    }

    fn srgb_color_format() -> u32 {
        vk::Format::R8G8B8A8_SRGB.as_raw() as u32
    }

    fn wrap_image(raw: u64) -> vk::Image {
        vk::Image::from_raw(raw)
    }
}

/// Builder for [`OpenXrRuntime`].
#[derive(Default)]
pub struct OpenXrRuntimeBuilder<'a> {
    path: Option<&'a std::path::Path>,
    application_name: Option<&'a str>,
    application_version: Option<u32>,
    api_version: Option<xr::Version>,
    required_extensions: Option<xr::ExtensionSet>,
}

impl<'a> OpenXrRuntimeBuilder<'a> {
    /// Create an `OpenXrRuntimeBuilder`
    pub fn new() -> Self {
        OpenXrRuntimeBuilder::default()
    }

    /// Load the OpenXR loader from `path` instead of the system default
    pub fn path(&mut self, path: Option<&'a std::path::Path>) -> &mut Self {
        self.path = path;
        self
    }

    /// Set the OpenXR application name
    pub fn application_name(&mut self, name: Option<&'a str>) -> &mut Self {
        self.application_name = name;
        self
    }

    /// Set the OpenXR application version
    pub fn application_version(&mut self, version: Option<u32>) -> &mut Self {
        self.application_version = version;
        self
    }

    /// Set the OpenXR API version the runtime must support
    pub fn api_version(&mut self, version: Option<xr::Version>) -> &mut Self {
        self.api_version = version;
        self
    }

    /// Set additional OpenXR extensions
    pub fn required_extensions(&mut self, extensions: Option<xr::ExtensionSet>) -> &mut Self {
        self.required_extensions = extensions;
        self
    }

    /// Create the instance, find the headset and create a session bound to the caller's
    /// graphics context.
    ///
    /// # Safety
    /// The handles in `session_create_info` must be valid and must stay valid for the whole
    /// lifetime of the returned runtime.
    pub unsafe fn build<G: GraphicsBinding>(
        &mut self,
        session_create_info: &G::SessionCreateInfo,
    ) -> KiResult<OpenXrRuntime<G>> {
        let application_name = self.application_name.unwrap_or("KI ENGINE");
        let application_version = self.application_version.unwrap_or(1);
        let api_version = self.api_version.unwrap_or(API_VERSION);

        let (instance, system) = create_xr_instance::<G>(
            self.path,
            application_name,
            application_version,
            api_version,
            self.required_extensions.as_ref(),
        )?;

        G::check_requirements(&instance, system)
            .map_err(KiError::unavailable("xrGetGraphicsRequirements"))?;

        info!("[KI_XR] Creating session..");
        let (session, frame_waiter, frame_stream) = instance
            .create_session::<G>(system, session_create_info)
            .map_err(KiError::unavailable("xrCreateSession"))?;
        info!("[KI_XR] ..done!");

        Ok(OpenXrRuntime {
            frame_stream,
            frame_waiter,
            session,
            system,
            instance,
            event_buffer: EventDataBuffer::new(),
        })
    }
}

fn create_xr_instance<G: GraphicsBinding>(
    path: Option<&std::path::Path>,
    application_name: &str,
    application_version: u32,
    api_version: xr::Version,
    required_extensions: Option<&xr::ExtensionSet>,
) -> KiResult<(xr::Instance, xr::SystemId)> {
    let loaded = match path {
        Some(path) => unsafe { xr::Entry::load_from(path) },
        None => unsafe { xr::Entry::load() },
    };
    let xr_entry = loaded.map_err(|e| {
        error!("[KI_XR] Unable to load the OpenXR loader: {e:?}");
        KiError::RuntimeUnavailable {
            call: "xrGetInstanceProcAddr",
            result: xr::sys::Result::ERROR_INITIALIZATION_FAILED,
        }
    })?;

    let available = xr_entry
        .enumerate_extensions()
        .map_err(KiError::unavailable("xrEnumerateInstanceExtensionProperties"))?;
    if !G::extension_available(&available) {
        return Err(KiError::RuntimeUnavailable {
            call: "xrEnumerateInstanceExtensionProperties",
            result: xr::sys::Result::ERROR_EXTENSION_NOT_PRESENT,
        });
    }

    let mut extensions = required_extensions.cloned().unwrap_or_default();
    G::enable_extension(&mut extensions);

    let xr_app_info = xr::ApplicationInfo {
        application_name,
        application_version,
        engine_name: "KI ENGINE",
        engine_version: 1,
        api_version,
    };

    let instance = xr_entry
        .create_instance(&xr_app_info, &extensions, &[])
        .map_err(KiError::unavailable("xrCreateInstance"))?;
    if let Ok(properties) = instance.properties() {
        info!(
            "[KI_XR] Runtime: {} {}",
            properties.runtime_name,
            version_string(properties.runtime_version)
        );
    }

    let system = instance
        .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
        .map_err(KiError::unavailable("xrGetSystem"))?;
    Ok((instance, system))
}

/// A session with a real OpenXR runtime.
pub struct OpenXrRuntime<G: GraphicsBinding> {
    frame_stream: FrameStream<G>,
    frame_waiter: FrameWaiter,
    session: Session<G>,
    system: xr::SystemId,
    instance: xr::Instance,
    event_buffer: EventDataBuffer,
}

impl<G: GraphicsBinding> OpenXrRuntime<G> {
    /// The underlying OpenXR instance
    pub fn instance(&self) -> &xr::Instance {
        &self.instance
    }

    /// The underlying OpenXR session
    pub fn session(&self) -> &Session<G> {
        &self.session
    }
}

/// The swapchain of an [`OpenXrRuntime`], with its images enumerated up front.
pub struct OpenXrSwapchain<G: GraphicsBinding> {
    handle: Swapchain<G>,
    images: Vec<G::Image>,
}

impl<G: GraphicsBinding> SwapchainHandle for OpenXrSwapchain<G> {
    type Image = G::Image;

    fn images(&self) -> &[G::Image] {
        &self.images
    }

    fn acquire(&mut self) -> xr::Result<u32> {
        self.handle.acquire_image()
    }

    // `Swapchain::wait_image` folds TIMEOUT_EXPIRED into success, so go through the raw call.
    fn wait(&mut self, timeout: xr::Duration) -> xr::Result<WaitStatus> {
        let info = xr::sys::SwapchainImageWaitInfo {
            ty: xr::sys::SwapchainImageWaitInfo::TYPE,
            next: std::ptr::null(),
            timeout,
        };
        let result = unsafe {
            (self.handle.instance().fp().wait_swapchain_image)(self.handle.as_raw(), &info)
        };

        match result {
            xr::sys::Result::TIMEOUT_EXPIRED => Ok(WaitStatus::TimedOut),
            result if result.into_raw() >= 0 => Ok(WaitStatus::Ready),
            result => Err(result),
        }
    }

    fn release(&mut self) -> xr::Result<()> {
        self.handle.release_image()
    }
}

impl<G: GraphicsBinding> XrRuntime for OpenXrRuntime<G> {
    type Space = Space;
    type Swapchain = OpenXrSwapchain<G>;

    fn recommended_view_extent(&self) -> xr::Result<xr::Extent2Di> {
        let views = self
            .instance
            .enumerate_view_configuration_views(self.system, VIEW_TYPE)?;
        info!("[KI_XR] Views: {views:?}");
        let view = views
            .first()
            .ok_or(xr::sys::Result::ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED)?;

        Ok(xr::Extent2Di {
            width: view.recommended_image_rect_width as _,
            height: view.recommended_image_rect_height as _,
        })
    }

    fn create_reference_space(&mut self) -> xr::Result<Space> {
        self.session
            .create_reference_space(ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
    }

    fn create_swapchain(
        &mut self,
        extent: xr::Extent2Di,
        array_size: u32,
    ) -> xr::Result<OpenXrSwapchain<G>> {
        let handle = self.session.create_swapchain(&xr::SwapchainCreateInfo {
            create_flags: SwapchainCreateFlags::EMPTY,
            usage_flags: SwapchainUsageFlags::COLOR_ATTACHMENT | SwapchainUsageFlags::SAMPLED,
            format: G::srgb_color_format(),
            sample_count: 1,
            width: extent.width as _,
            height: extent.height as _,
            face_count: 1,
            array_size,
            mip_count: 1,
        })?;
        let images = handle
            .enumerate_images()?
            .into_iter()
            .map(G::wrap_image)
            .collect::<Vec<_>>();
        info!("[KI_XR] Swapchain created with {} images", images.len());

        Ok(OpenXrSwapchain { handle, images })
    }

    fn poll_session_state(&mut self) -> xr::Result<Option<xr::SessionState>> {
        match self.instance.poll_event(&mut self.event_buffer)? {
            Some(xr::Event::SessionStateChanged(session_changed)) => {
                Ok(Some(session_changed.state()))
            }
            Some(xr::Event::InstanceLossPending(_)) => Ok(Some(xr::SessionState::LOSS_PENDING)),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }

    fn begin_session(&mut self) -> xr::Result<()> {
        self.session.begin(VIEW_TYPE).map(|_| ())
    }

    fn wait_frame(&mut self) -> xr::Result<xr::FrameState> {
        self.frame_waiter.wait()
    }

    fn begin_frame(&mut self) -> xr::Result<()> {
        self.frame_stream.begin().map(|_| ())
    }

    fn locate_views(
        &mut self,
        space: &Space,
        display_time: xr::Time,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<xr::View>)> {
        self.session.locate_views(VIEW_TYPE, display_time, space)
    }

    fn end_frame(
        &mut self,
        display_time: xr::Time,
        space: &Space,
        swapchain: &OpenXrSwapchain<G>,
        views: &[LayerView],
    ) -> xr::Result<()> {
        if views.is_empty() {
            return self.frame_stream.end(display_time, BLEND_MODE, &[]);
        }

        let projection_views = views
            .iter()
            .map(|view| {
                xr::CompositionLayerProjectionView::new()
                    .pose(view.pose)
                    .fov(view.fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(&swapchain.handle)
                            .image_array_index(view.image_array_index)
                            .image_rect(view.image_rect),
                    )
            })
            .collect::<Vec<_>>();

        let layer_projection = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&projection_views);

        self.frame_stream
            .end(display_time, BLEND_MODE, &[&*layer_projection])
    }

    fn end_session(&mut self) -> xr::Result<()> {
        info!("[KI_XR] - Ending session..");
        self.session.end()?;
        info!("[KI_XR] - ..done!");
        Ok(())
    }
}
